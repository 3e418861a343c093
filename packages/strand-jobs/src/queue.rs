use std::cell::RefCell;
use std::collections::VecDeque;

use strand_loop::Cancellable;

/// A queued unit of work: one promise reaction.
pub type Job = Box<dyn FnOnce()>;

/// The interpreter-side job queue the drain source polls and drains.
///
/// The implementor is the interpreter handle itself, so the drain calls
/// need no separate context argument. Both methods are only ever called
/// from the loop thread.
pub trait JobQueue {
    /// Whether any job is queued. Polled every loop iteration, so this
    /// must be O(1) and must not have side effects.
    fn is_empty(&self) -> bool;

    /// Run every queued job, and every job enqueued by those jobs, until
    /// the queue is empty or `cancellable` is observed cancelled between
    /// jobs. A job already running is never interrupted; cancellation is
    /// cooperative.
    fn run_jobs(&self, cancellable: &Cancellable);
}

/// FIFO job queue for single-threaded hosts.
#[derive(Default)]
pub struct LocalJobQueue {
    jobs: RefCell<VecDeque<Job>>,
}

impl LocalJobQueue {
    pub fn new() -> LocalJobQueue {
        LocalJobQueue::default()
    }

    /// Enqueue a job. Safe to call from inside a running job; the new
    /// job runs within the same drain.
    pub fn enqueue(&self, job: impl FnOnce() + 'static) {
        self.jobs.borrow_mut().push_back(Box::new(job));
    }

    pub fn len(&self) -> usize {
        self.jobs.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.borrow().is_empty()
    }
}

impl JobQueue for LocalJobQueue {
    fn is_empty(&self) -> bool {
        self.jobs.borrow().is_empty()
    }

    fn run_jobs(&self, cancellable: &Cancellable) {
        tracing::trace!(queued = self.len(), "draining job queue");
        // Pop one job at a time: jobs may enqueue more jobs while they
        // run, and those must drain in the same pass. The queue borrow
        // is released before each job runs.
        loop {
            if cancellable.is_cancelled() {
                tracing::debug!(remaining = self.len(), "drain cancelled between jobs");
                break;
            }
            let Some(job) = self.jobs.borrow_mut().pop_front() else {
                break;
            };
            job();
        }
    }
}
