use std::time::Duration;

use crate::context::SourceContext;

/// Scheduling priority of an attached source. Lower values win: within
/// one loop iteration only the ready sources of the single lowest
/// (numerically) ready priority are dispatched at all; everything else
/// waits for a later turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub i32);

impl Priority {
    /// Latency-sensitive sources.
    pub const HIGH: Priority = Priority(-100);
    /// Ordinary sources.
    pub const DEFAULT: Priority = Priority(0);
    /// Background work that should only run when nothing else is ready.
    pub const LOW: Priority = Priority(300);

    /// Scale this priority away from the normal range, e.g.
    /// `Priority::HIGH.times(10)` for a source that must always win.
    pub const fn times(self, factor: i32) -> Priority {
        Priority(self.0 * factor)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

/// Verdict of a source's prepare phase.
///
/// `timeout` is advisory: a not-ready source may report how long an
/// embedding poller can sleep before it should be re-prepared. The loop
/// itself never blocks; see [`crate::LoopContext::next_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prepare {
    pub ready: bool,
    pub timeout: Option<Duration>,
}

impl Prepare {
    /// The source wants to dispatch this iteration.
    pub const fn ready() -> Prepare {
        Prepare {
            ready: true,
            timeout: None,
        }
    }

    /// Nothing to do, and no opinion on when to be asked again.
    pub const fn not_ready() -> Prepare {
        Prepare {
            ready: false,
            timeout: None,
        }
    }

    /// Nothing to do for at least `timeout`.
    pub const fn wait(timeout: Duration) -> Prepare {
        Prepare {
            ready: false,
            timeout: Some(timeout),
        }
    }
}

/// What the loop should do with a source after dispatching it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Keep the source attached; it will be prepared again next turn.
    Continue,
    /// Detach and finalize the source (and its children).
    Remove,
}

/// An attachable, pollable unit of work within a [`crate::LoopContext`].
///
/// Methods take `&self`: sources live behind `Rc` in the loop registry,
/// and a `dispatch` callback is allowed to re-enter the context — attach
/// or destroy sources, rewire its own children — so implementations keep
/// their mutable state in `Cell`/`RefCell` fields and release any borrow
/// before calling back into user code.
pub trait Source {
    /// Short static name, used in logging.
    fn name(&self) -> &'static str {
        "source"
    }

    /// Decide whether this source wants to dispatch this iteration. Runs
    /// every iteration for every attached source, so it must be cheap
    /// and must not have side effects.
    fn prepare(&self) -> Prepare;

    /// Run the source's work. `ctx` names this source's own registration
    /// so the callback can operate on it (e.g. clear a forced-ready
    /// flag). May run arbitrarily long; that blocks the loop, which is
    /// the cooperative model working as intended.
    fn dispatch(&self, ctx: &SourceContext) -> Dispatch;

    /// Called exactly once when the loop drops this source's
    /// registration, whether via [`Dispatch::Remove`] or an explicit
    /// destroy.
    fn finalize(&self) {}
}
