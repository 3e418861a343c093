use std::cell::{Cell, RefCell};
use std::rc::Rc;

use strand_loop::{
    CancelSource, Cancellable, Dispatch, LoopContext, Prepare, Priority, Source, SourceContext,
    SourceId,
};

use crate::queue::JobQueue;

/// Cancellation state for one start/stop cycle of the drain source.
///
/// The token is single-use: a reset replaces flag and wake child
/// wholesale rather than un-cancelling in place, so a token handle
/// captured mid-drain keeps observing the cycle it was captured in.
struct CancellationGate {
    cancellable: Cancellable,
    wake: Rc<CancelSource>,
    wake_attachment: Option<SourceId>,
}

impl CancellationGate {
    fn new() -> CancellationGate {
        let cancellable = Cancellable::new();
        let wake = cancellable.wake_source();
        CancellationGate {
            cancellable,
            wake,
            wake_attachment: None,
        }
    }
}

/// Loop source that drains the interpreter's job queue.
///
/// Ready whenever the queue is non-empty; every dispatch runs the queue
/// to empty, including jobs enqueued during the drain. The source stays
/// attached indefinitely — only a cancelled gate removes it — and the
/// gate's wake child makes a pending removal observable promptly even
/// when no job is queued.
pub struct JobDrainSource {
    /// The interpreter-side queue provider. Non-owning in spirit: the
    /// provider outlives every drain cycle.
    queue: Rc<dyn JobQueue>,
    /// Held for the source's whole life so attaching and detaching stay
    /// valid no matter when the host drops its own handles.
    context: LoopContext,
    gate: RefCell<CancellationGate>,
    attachment: Cell<Option<SourceId>>,
}

impl JobDrainSource {
    /// Ten times [`Priority::HIGH`], deliberately far outside the normal
    /// range: whenever jobs are queued this source wins the iteration,
    /// and no application source should ever use a priority this high.
    pub const PRIORITY: Priority = Priority::HIGH.times(10);

    pub(crate) fn new(queue: Rc<dyn JobQueue>, context: LoopContext) -> Rc<JobDrainSource> {
        Rc::new(JobDrainSource {
            queue,
            context,
            gate: RefCell::new(CancellationGate::new()),
            attachment: Cell::new(None),
        })
    }

    pub(crate) fn attachment(&self) -> Option<SourceId> {
        self.attachment.get()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.attachment
            .get()
            .is_some_and(|id| self.context.is_attached(id))
    }

    /// Attach to the held loop context and compose the gate's wake child.
    /// The caller (`JobDispatcher::start`) guarantees we are not already
    /// attached.
    pub(crate) fn attach(self: Rc<Self>) {
        let id = self.context.attach(self.clone(), Self::PRIORITY);
        self.attachment.set(Some(id));
        let mut gate = self.gate.borrow_mut();
        gate.wake_attachment = self
            .context
            .add_child_source(id, gate.wake.clone() as Rc<dyn Source>)
            .ok();
    }

    /// Trigger the gate. The source detaches itself on its next
    /// dispatch, never mid-drain of the current one.
    pub(crate) fn cancel(&self) {
        let gate = self.gate.borrow();
        gate.cancellable.cancel();
        // Kick the loop out of idling so the pending removal is observed
        // promptly even with an empty job queue.
        if let Some(id) = self.attachment.get() {
            let _ = self.context.set_ready_now(id);
        }
    }

    /// Undo a prior cancellation by installing a fresh gate. No-op if
    /// the current gate was never cancelled: tokens are single-use, so a
    /// cancelled gate is replaced, never reset in place.
    pub(crate) fn reset(&self) {
        let mut gate = self.gate.borrow_mut();
        if !gate.cancellable.is_cancelled() {
            return;
        }

        // The old wake child needs loop surgery only while we are
        // registered; otherwise dropping the gate drops it outright.
        let attached = self
            .attachment
            .get()
            .filter(|&id| self.context.is_attached(id));
        if let (Some(owner), Some(wake_id)) = (attached, gate.wake_attachment) {
            if let Err(err) = self.context.remove_child_source(owner, wake_id) {
                tracing::debug!(%err, "stale wake child during reset");
            }
        }

        *gate = CancellationGate::new();
        if let Some(owner) = attached {
            gate.wake_attachment = self
                .context
                .add_child_source(owner, gate.wake.clone() as Rc<dyn Source>)
                .ok();
        }
    }
}

impl Source for JobDrainSource {
    fn name(&self) -> &'static str {
        "promise-job-drain"
    }

    fn prepare(&self) -> Prepare {
        if self.queue.is_empty() {
            Prepare::not_ready()
        } else {
            Prepare::ready()
        }
    }

    fn dispatch(&self, ctx: &SourceContext) -> Dispatch {
        let token = {
            let gate = self.gate.borrow();
            if gate.cancellable.is_cancelled() {
                tracing::debug!("job drain cancelled, detaching");
                return Dispatch::Remove;
            }

            // Cancellation forces us ready-now to break out of idling;
            // clear it or this source would look ready on every
            // following iteration and starve the other sources.
            ctx.clear_ready_now();

            // A job may stop and reset the dispatcher mid-drain,
            // replacing the gate. Hold our own handle to the current
            // token so the drain keeps reading the cycle it started in.
            gate.cancellable.clone()
        };
        self.queue.run_jobs(&token);
        Dispatch::Continue
    }

    fn finalize(&self) {
        // Registration is gone (and the wake child with it); clear the
        // stale ids so a later start() re-attaches from scratch.
        self.attachment.set(None);
        self.gate.borrow_mut().wake_attachment = None;
    }
}
