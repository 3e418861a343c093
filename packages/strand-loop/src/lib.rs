//! A cooperative, single-threaded event loop built from pluggable
//! sources.
//!
//! A [`Source`] is an attachable unit of work with a readiness phase
//! (`prepare`) and an execution phase (`dispatch`). A [`LoopContext`]
//! holds the sources one thread polls: each [`LoopContext::iteration`]
//! prepares every attached source and dispatches the ready sources of
//! the single highest ready priority band. Sources can be composed
//! (a ready child forces its parent's dispatch), forced ready out of
//! band, and cancelled cooperatively through a one-shot [`Cancellable`].
//!
//! Everything here is strictly single-threaded: handles are `Rc`-based
//! and none of the loop operations block.

pub mod cancellable;
pub mod context;
pub mod error;
pub mod source;

pub use cancellable::{CancelSource, Cancellable};
pub use context::{LoopContext, SourceContext, SourceId};
pub use error::LoopError;
pub use source::{Dispatch, Prepare, Priority, Source};
