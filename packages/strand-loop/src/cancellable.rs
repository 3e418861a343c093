use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::context::SourceContext;
use crate::source::{Dispatch, Prepare, Source};

/// One-shot cooperative cancellation token.
///
/// Cloning yields another strong handle to the same flag, which is how a
/// caller captures the *current* token before handing control to code
/// that may replace it. `cancel` is idempotent and monotonic: once
/// cancelled, a `Cancellable` never reads false again. "Resetting" means
/// constructing a replacement token, never mutating the old one, so a
/// stale handle keeps observing the cycle it was captured in.
#[derive(Clone, Default)]
pub struct Cancellable {
    flag: Rc<Cell<bool>>,
}

impl Cancellable {
    pub fn new() -> Cancellable {
        Cancellable::default()
    }

    /// Request cancellation. Idempotent; later calls are no-ops.
    pub fn cancel(&self) {
        if !self.flag.replace(true) {
            tracing::trace!("cancellable fired");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.get()
    }

    /// Create the wake source paired with this token. Composed as a
    /// child source, it forces the parent's dispatch once [`cancel`]
    /// fires, even if the parent itself reports not-ready.
    ///
    /// [`cancel`]: Cancellable::cancel
    pub fn wake_source(&self) -> Rc<CancelSource> {
        Rc::new(CancelSource {
            cancellable: self.clone(),
        })
    }
}

impl fmt::Debug for Cancellable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancellable")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Source that becomes ready exactly when its paired [`Cancellable`]
/// fires.
pub struct CancelSource {
    cancellable: Cancellable,
}

impl Source for CancelSource {
    fn name(&self) -> &'static str {
        "cancel-wake"
    }

    fn prepare(&self) -> Prepare {
        if self.cancellable.is_cancelled() {
            Prepare::ready()
        } else {
            Prepare::not_ready()
        }
    }

    fn dispatch(&self, _ctx: &SourceContext) -> Dispatch {
        // Dispatched directly only when attached top-level; as a child
        // its readiness is consumed by the parent. One-shot either way.
        Dispatch::Remove
    }
}
