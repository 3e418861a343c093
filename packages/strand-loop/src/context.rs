use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::error::LoopError;
use crate::source::{Dispatch, Priority, Source};

new_key_type! {
    /// Versioned handle to a source registration. Slots are reused but
    /// keys are not, so a stale id is always safe to query: it simply
    /// reports the source as gone.
    pub struct SourceId;
}

struct Registration {
    source: Rc<dyn Source>,
    priority: Priority,
    name: &'static str,
    /// Forced "dispatch next iteration" flag, see
    /// [`LoopContext::set_ready_now`].
    ready_now: bool,
    /// Sources composed under this one; a ready child forces this
    /// source's dispatch. Children are never dispatched on their own.
    children: SmallVec<[SourceId; 2]>,
    parent: Option<SourceId>,
    /// Attach order, tie-break within a priority band.
    seq: u64,
}

#[derive(Default)]
struct Registry {
    sources: SlotMap<SourceId, Registration>,
    next_seq: u64,
}

/// Prepared view of one top-level registration, taken before any user
/// callback runs so the registry borrow is never held across one.
struct Candidate {
    id: SourceId,
    source: Rc<dyn Source>,
    priority: Priority,
    name: &'static str,
    forced: bool,
    seq: u64,
    children: SmallVec<[Rc<dyn Source>; 2]>,
}

/// Handle to the registry a set of sources is attached to and polled
/// from by one thread. Cloning is cheap and clones share the same
/// registry; the handle is a strong reference, so holding one keeps the
/// context valid to attach to and detach from for as long as needed.
#[derive(Clone, Default)]
pub struct LoopContext {
    registry: Rc<RefCell<Registry>>,
}

thread_local! {
    static THREAD_DEFAULT: LoopContext = LoopContext::new();
}

impl LoopContext {
    pub fn new() -> LoopContext {
        LoopContext::default()
    }

    /// The calling thread's default context, created lazily on first
    /// use. Every handle returned on one thread shares one registry.
    pub fn thread_default() -> LoopContext {
        THREAD_DEFAULT.with(LoopContext::clone)
    }

    /// Attach a source at the given priority. The registry holds the
    /// strong reference until the source is destroyed or removes itself
    /// by returning [`Dispatch::Remove`].
    pub fn attach(&self, source: Rc<dyn Source>, priority: Priority) -> SourceId {
        let name = source.name();
        let mut registry = self.registry.borrow_mut();
        let seq = registry.next_seq;
        registry.next_seq += 1;
        let id = registry.sources.insert(Registration {
            source,
            priority,
            name,
            ready_now: false,
            children: SmallVec::new(),
            parent: None,
            seq,
        });
        tracing::debug!(?id, name, priority = priority.0, "source attached");
        id
    }

    /// Compose `child` under `parent`: from now on a ready child forces
    /// the parent's dispatch. The child shares the parent's priority and
    /// is destroyed with it.
    pub fn add_child_source(
        &self,
        parent: SourceId,
        child: Rc<dyn Source>,
    ) -> Result<SourceId, LoopError> {
        let name = child.name();
        let mut registry = self.registry.borrow_mut();
        let seq = registry.next_seq;
        registry.next_seq += 1;
        let priority = registry
            .sources
            .get(parent)
            .ok_or(LoopError::SourceDestroyed(parent))?
            .priority;
        let id = registry.sources.insert(Registration {
            source: child,
            priority,
            name,
            ready_now: false,
            children: SmallVec::new(),
            parent: Some(parent),
            seq,
        });
        registry.sources[parent].children.push(id);
        tracing::trace!(?id, ?parent, name, "child source added");
        Ok(id)
    }

    /// Detach `child` from `parent` and finalize it. The parent stays
    /// attached.
    pub fn remove_child_source(&self, parent: SourceId, child: SourceId) -> Result<(), LoopError> {
        {
            let mut registry = self.registry.borrow_mut();
            let reg = registry
                .sources
                .get_mut(parent)
                .ok_or(LoopError::SourceDestroyed(parent))?;
            let pos = reg
                .children
                .iter()
                .position(|&c| c == child)
                .ok_or(LoopError::NotAChild { parent, child })?;
            reg.children.remove(pos);
        }
        self.finalize_one(child);
        Ok(())
    }

    /// Detach and finalize a source and all of its children. Idempotent:
    /// a stale or already-destroyed id is ignored.
    pub fn destroy(&self, id: SourceId) {
        let (children, parent) = {
            let registry = self.registry.borrow();
            match registry.sources.get(id) {
                Some(reg) => (reg.children.clone(), reg.parent),
                None => return,
            }
        };
        if let Some(parent) = parent {
            let mut registry = self.registry.borrow_mut();
            if let Some(reg) = registry.sources.get_mut(parent) {
                reg.children.retain(|&mut c| c != id);
            }
        }
        for child in children {
            self.destroy(child);
        }
        self.finalize_one(id);
    }

    /// Whether `id` still names an attached source.
    pub fn is_attached(&self, id: SourceId) -> bool {
        self.registry.borrow().sources.contains_key(id)
    }

    /// Force a source to be dispatched on the next iteration regardless
    /// of what its `prepare` reports. The flag sticks until
    /// [`clear_ready_now`] is called, usually by the source itself from
    /// inside `dispatch`.
    ///
    /// [`clear_ready_now`]: LoopContext::clear_ready_now
    pub fn set_ready_now(&self, id: SourceId) -> Result<(), LoopError> {
        self.set_forced(id, true)
    }

    /// Clear a forced-ready flag set by [`LoopContext::set_ready_now`].
    pub fn clear_ready_now(&self, id: SourceId) -> Result<(), LoopError> {
        self.set_forced(id, false)
    }

    fn set_forced(&self, id: SourceId, forced: bool) -> Result<(), LoopError> {
        let mut registry = self.registry.borrow_mut();
        let reg = registry
            .sources
            .get_mut(id)
            .ok_or(LoopError::SourceDestroyed(id))?;
        reg.ready_now = forced;
        Ok(())
    }

    /// Run one cooperative turn: prepare every attached source, then
    /// dispatch the ready sources of the single highest ready priority
    /// band, in attach order. Lower-priority ready sources are not
    /// dispatched this turn. Returns true if anything dispatched.
    pub fn iteration(&self) -> bool {
        let mut candidates = self.snapshot();
        candidates.sort_by_key(|c| (c.priority, c.seq));

        let ready: Vec<&Candidate> = candidates.iter().filter(|c| is_ready(c)).collect();
        let Some(band) = ready.first().map(|c| c.priority) else {
            return false;
        };

        let mut dispatched = false;
        for candidate in ready.into_iter().take_while(|c| c.priority == band) {
            // A source dispatched earlier this turn may have destroyed
            // this one; the snapshot re-checks liveness.
            if !self.is_attached(candidate.id) {
                continue;
            }
            dispatched = true;
            tracing::trace!(name = candidate.name, "dispatching source");
            let ctx = SourceContext {
                context: self.clone(),
                id: candidate.id,
            };
            if let Dispatch::Remove = candidate.source.dispatch(&ctx) {
                tracing::debug!(name = candidate.name, "source removed itself");
                self.destroy(candidate.id);
            }
        }
        dispatched
    }

    /// Run iterations until a turn dispatches nothing.
    pub fn run_pending(&self) {
        while self.iteration() {}
    }

    /// Advisory poll timeout for an embedding poller: `Some(ZERO)` if any
    /// source is ready right now, otherwise the smallest timeout any
    /// not-ready source reported, or `None` if nothing asked to be
    /// re-polled.
    pub fn next_timeout(&self) -> Option<Duration> {
        let candidates = self.snapshot();
        let mut min: Option<Duration> = None;
        for candidate in &candidates {
            if candidate.forced {
                return Some(Duration::ZERO);
            }
            let own = candidate.source.prepare();
            if own.ready || candidate.children.iter().any(|c| c.prepare().ready) {
                return Some(Duration::ZERO);
            }
            if let Some(timeout) = own.timeout {
                min = Some(min.map_or(timeout, |m| m.min(timeout)));
            }
        }
        min
    }

    /// Snapshot all top-level registrations. No registry borrow is held
    /// once this returns, so user callbacks are free to re-enter the
    /// context.
    fn snapshot(&self) -> Vec<Candidate> {
        let registry = self.registry.borrow();
        registry
            .sources
            .iter()
            .filter(|(_, reg)| reg.parent.is_none())
            .map(|(id, reg)| Candidate {
                id,
                source: reg.source.clone(),
                priority: reg.priority,
                name: reg.name,
                forced: reg.ready_now,
                seq: reg.seq,
                children: reg
                    .children
                    .iter()
                    .filter_map(|&c| registry.sources.get(c).map(|r| r.source.clone()))
                    .collect(),
            })
            .collect()
    }

    fn finalize_one(&self, id: SourceId) {
        let removed = self.registry.borrow_mut().sources.remove(id);
        if let Some(reg) = removed {
            tracing::debug!(?id, name = reg.name, "source destroyed");
            // Borrow released above: finalize may re-enter the context.
            reg.source.finalize();
        }
    }
}

fn is_ready(candidate: &Candidate) -> bool {
    candidate.forced
        || candidate.source.prepare().ready
        || candidate.children.iter().any(|c| c.prepare().ready)
}

/// Names the dispatching source's own registration inside
/// [`Source::dispatch`].
pub struct SourceContext {
    context: LoopContext,
    id: SourceId,
}

impl SourceContext {
    pub fn context(&self) -> &LoopContext {
        &self.context
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Clear this source's forced-ready flag. A source that was forced
    /// awake does this first thing in `dispatch`, or it would look ready
    /// every following iteration and starve the rest of the loop.
    pub fn clear_ready_now(&self) {
        let _ = self.context.clear_ready_now(self.id);
    }
}
