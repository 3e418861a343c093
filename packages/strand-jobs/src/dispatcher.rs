use std::rc::Rc;

use strand_loop::LoopContext;

use crate::queue::JobQueue;
use crate::source::JobDrainSource;

/// Owns a [`JobDrainSource`] bound to one loop context and presents the
/// host-facing lifecycle.
///
/// State machine: `Detached --start()--> Attached`; `stop()` arms the
/// cancellation gate but the source only leaves the loop on its next
/// dispatch cycle; `start()` after a completed stop re-attaches with a
/// fresh gate. Every transition is safe to trigger from inside a job
/// being drained. Dropping the dispatcher force-detaches the source so
/// no loop registration outlives it.
pub struct JobDispatcher {
    context: LoopContext,
    source: Rc<JobDrainSource>,
}

impl JobDispatcher {
    /// Bind to the calling thread's default loop context.
    pub fn new(queue: Rc<dyn JobQueue>) -> JobDispatcher {
        JobDispatcher::with_context(queue, LoopContext::thread_default())
    }

    /// Bind to an explicit loop context.
    pub fn with_context(queue: Rc<dyn JobQueue>, context: LoopContext) -> JobDispatcher {
        let source = JobDrainSource::new(queue, context.clone());
        JobDispatcher { context, source }
    }

    /// Arm the source and attach it if it is not already running.
    /// Idempotent: a second call while running changes nothing, and a
    /// pending cancellation is undone before the attach check so a
    /// stopped-but-not-yet-detached source simply keeps running.
    pub fn start(&self) {
        self.source.reset();
        if self.is_running() {
            return;
        }
        self.source.clone().attach();
    }

    /// Request detachment. Deferred: in-flight job execution is never
    /// interrupted; the source observes the cancellation on its next
    /// dispatch cycle and removes itself then.
    pub fn stop(&self) {
        self.source.cancel();
    }

    /// Whether the source is currently attached to the loop context.
    pub fn is_running(&self) -> bool {
        self.source.is_running()
    }
}

impl Drop for JobDispatcher {
    fn drop(&mut self) {
        if let Some(id) = self.source.attachment() {
            self.context.destroy(id);
        }
    }
}
