use std::cell::{Cell, RefCell};
use std::rc::Rc;

use strand_jobs::{JobDispatcher, LocalJobQueue};
use strand_loop::LoopContext;

type Log = Rc<RefCell<Vec<&'static str>>>;

fn fixture() -> (LoopContext, Rc<LocalJobQueue>) {
    (LoopContext::new(), Rc::new(LocalJobQueue::new()))
}

#[test]
fn test_dispatcher_starts_detached() {
    let (ctx, queue) = fixture();
    let dispatcher = JobDispatcher::with_context(queue, ctx);
    assert!(!dispatcher.is_running());
}

#[test]
fn test_start_is_idempotent() {
    let (ctx, queue) = fixture();
    let dispatcher = JobDispatcher::with_context(queue.clone(), ctx.clone());

    dispatcher.start();
    dispatcher.start();
    assert!(dispatcher.is_running());

    // A double attach would run the job twice in one turn.
    let ran = Rc::new(Cell::new(0));
    {
        let ran = ran.clone();
        queue.enqueue(move || ran.set(ran.get() + 1));
    }
    assert!(ctx.iteration());
    assert_eq!(ran.get(), 1);
    assert!(!ctx.iteration());
}

#[test]
fn test_stop_is_deferred_to_the_next_dispatch_cycle() {
    let (ctx, queue) = fixture();
    let dispatcher = Rc::new(JobDispatcher::with_context(queue.clone(), ctx.clone()));
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    {
        let log = log.clone();
        let dispatcher = dispatcher.clone();
        queue.enqueue(move || {
            dispatcher.stop();
            // Still running our own tail: stop must not abort this job.
            log.borrow_mut().push("after-stop");
            assert!(dispatcher.is_running());
        });
    }

    dispatcher.start();
    assert!(ctx.iteration());
    assert_eq!(*log.borrow(), vec!["after-stop"]);

    // The cancellation is armed but not yet observed.
    assert!(dispatcher.is_running());

    // Next cycle the source removes itself, despite the empty queue
    // (the gate's wake child forces the dispatch).
    assert!(ctx.iteration());
    assert!(!dispatcher.is_running());
}

#[test]
fn test_stop_without_start_then_start_runs_normally() {
    let (ctx, queue) = fixture();
    let dispatcher = JobDispatcher::with_context(queue.clone(), ctx.clone());

    // Cancelling a detached dispatcher arms the gate; start resets it.
    dispatcher.stop();
    dispatcher.start();
    assert!(dispatcher.is_running());

    let ran = Rc::new(Cell::new(0));
    {
        let ran = ran.clone();
        queue.enqueue(move || ran.set(ran.get() + 1));
    }
    assert!(ctx.iteration());
    assert_eq!(ran.get(), 1);
    assert!(dispatcher.is_running());
}

#[test]
fn test_restart_after_a_completed_stop_cycle() {
    let (ctx, queue) = fixture();
    let dispatcher = JobDispatcher::with_context(queue.clone(), ctx.clone());

    dispatcher.start();
    dispatcher.stop();
    assert!(ctx.iteration());
    assert!(!dispatcher.is_running());

    // No cancellation state leaks across the restart.
    dispatcher.start();
    assert!(dispatcher.is_running());

    let ran = Rc::new(Cell::new(0));
    {
        let ran = ran.clone();
        queue.enqueue(move || ran.set(ran.get() + 1));
    }
    assert!(ctx.iteration());
    assert_eq!(ran.get(), 1);
    assert!(dispatcher.is_running());
}

#[test]
fn test_restart_while_already_running_keeps_the_source_attached() {
    let (ctx, queue) = fixture();
    let dispatcher = JobDispatcher::with_context(queue.clone(), ctx.clone());

    dispatcher.start();
    dispatcher.stop();
    // Undo the stop before any dispatch observes it.
    dispatcher.start();
    assert!(dispatcher.is_running());

    let ran = Rc::new(Cell::new(0));
    {
        let ran = ran.clone();
        queue.enqueue(move || ran.set(ran.get() + 1));
    }
    assert!(ctx.iteration());
    assert_eq!(ran.get(), 1);
    assert!(dispatcher.is_running());
}

#[test]
fn test_stop_and_restart_from_inside_a_job() {
    let (ctx, queue) = fixture();
    let dispatcher = Rc::new(JobDispatcher::with_context(queue.clone(), ctx.clone()));
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    // The first job replaces the gate mid-drain. The dispatch captured
    // the old token, so the drain halts after this job; the fresh gate
    // keeps the source attached and the second job runs next turn.
    {
        let log = log.clone();
        let dispatcher = dispatcher.clone();
        queue.enqueue(move || {
            log.borrow_mut().push("restarting");
            dispatcher.stop();
            dispatcher.start();
        });
    }
    {
        let log = log.clone();
        queue.enqueue(move || log.borrow_mut().push("survivor"));
    }

    dispatcher.start();
    assert!(ctx.iteration());
    assert_eq!(*log.borrow(), vec!["restarting"]);
    assert!(dispatcher.is_running());

    assert!(ctx.iteration());
    assert_eq!(*log.borrow(), vec!["restarting", "survivor"]);
    assert!(dispatcher.is_running());
}

#[test]
fn test_drop_force_detaches_the_source() {
    let (ctx, queue) = fixture();
    let dispatcher = JobDispatcher::with_context(queue.clone(), ctx.clone());

    dispatcher.start();
    let ran = Rc::new(Cell::new(0));
    {
        let ran = ran.clone();
        queue.enqueue(move || ran.set(ran.get() + 1));
    }

    drop(dispatcher);

    // No registration survives the dispatcher: the queued job stays put.
    assert!(!ctx.iteration());
    assert_eq!(ran.get(), 0);
    assert_eq!(queue.len(), 1);
}
