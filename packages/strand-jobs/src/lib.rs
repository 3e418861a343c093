//! Promise-job dispatching for the strand event loop.
//!
//! Interpreters queue promise reactions ("jobs") on an internal job
//! queue. Jobs are microtasks: once any job is ready, every queued job —
//! and every job those jobs enqueue — must run before any other
//! scheduled work continues. [`JobDrainSource`] enforces that contract
//! as a custom loop source. It reports ready whenever the queue is
//! non-empty and drains the queue completely on every dispatch, at ten
//! times [`Priority::HIGH`] so no ordinary source can run first. This
//! technically means recursively-enqueuing jobs can starve the rest of
//! the loop; that is the intended run-to-completion semantics of
//! microtasks, not a defect.
//!
//! [`JobDispatcher`] owns the source, binds it to one loop context, and
//! exposes the host-facing `start`/`stop`/`is_running` lifecycle,
//! including restart after a completed stop cycle. All of it is safe to
//! call from inside a job being drained.
//!
//! [`Priority::HIGH`]: strand_loop::Priority::HIGH

pub mod dispatcher;
pub mod queue;
pub mod source;

pub use dispatcher::JobDispatcher;
pub use queue::{Job, JobQueue, LocalJobQueue};
pub use source::JobDrainSource;
