//! Module load scheduler
//!
//! Owns the work queue and decides what runs next. The scheduler never runs
//! anything itself: [`Scheduler::next`] is a pure decision over the queue and
//! the module graph, returned as a [`Step`] for the loader to carry out.
//!
//! ```text
//! Unresolved -> Queued -> Loading -> Loaded
//!                  ^         |
//!                  +---------+  suspended in require / retry
//!                            |
//!                            +-> Failed
//! ```

pub mod queue;

#[cfg(test)]
mod tests;

pub use queue::WorkQueue;

use std::collections::{HashMap, HashSet};

use tokio::sync::oneshot;

use crate::module::{Exports, LoadError, ModuleGraph, ModuleId, ModuleKind, ModuleState};
use crate::runtime::cycle::{Cycle, CycleResolver};

/// `define` factory: receives the exports of its dependencies in declared order.
pub type Factory = Box<dyn FnOnce(&[Exports]) -> Result<Exports, LoadError>>;

/// Resumes a module suspended inside `require`.
pub type Continuation = oneshot::Sender<Result<(), LoadError>>;

/// Receiving half of a [`Continuation`].
pub type Waiter = oneshot::Receiver<Result<(), LoadError>>;

struct PendingFactory {
    deps: Vec<ModuleId>,
    factory: Factory,
}

/// What the loader should do next.
pub enum Step {
    /// The queue is empty.
    Idle,
    /// Nothing is ready, but a load is in flight.
    Waiting,
    /// Fetch and run the module body at `location`.
    Fetch { id: ModuleId, location: String },
    /// Wake a module suspended inside `require`.
    ///
    /// A body awaiting several requires at once has one continuation per call.
    Resume {
        id: ModuleId,
        continuations: Vec<Continuation>,
    },
    /// Run a `define` factory.
    RunFactory {
        id: ModuleId,
        factory: Factory,
        args: Vec<Exports>,
    },
    /// Modules that failed because a dependency had failed.
    Failed { ids: Vec<ModuleId> },
    /// Queue is non-empty, nothing is ready and nothing is loading.
    Stall { seed: ModuleId },
}

/// Outcome of resolving a stall.
#[derive(Debug)]
pub enum StallOutcome {
    /// Cycles were broken; each `(holder, dependency)` pair is a new permission.
    Broken {
        cycles: Vec<Cycle>,
        granted: Vec<(ModuleId, ModuleId)>,
    },
    /// Cycle breaking is disabled; the first cycle failed its members.
    Thrown { cycle: Cycle, failed: Vec<ModuleId> },
    /// No permission could be granted from any seed.
    Deadlock { failed: Vec<ModuleId> },
}

/// Work queue plus the bookkeeping for suspended and in-flight modules.
#[derive(Default)]
pub struct Scheduler {
    queue: WorkQueue,
    /// Modules whose body or factory is currently running.
    loading: HashSet<ModuleId>,
    /// Modules suspended inside `require`, one entry per pending call.
    continuations: HashMap<ModuleId, Vec<Continuation>>,
    factories: HashMap<ModuleId, PendingFactory>,
    /// `settled` waiters.
    watchers: HashMap<ModuleId, Vec<Continuation>>,
    load_order: Vec<ModuleId>,
    draining: bool,
    rerun: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Scripts and defined modules in the order they reached `Loaded`.
    pub fn load_order(&self) -> &[ModuleId] {
        &self.load_order
    }

    pub fn is_loading(
        &self,
        id: ModuleId,
    ) -> bool {
        self.loading.contains(&id)
    }

    /// Nothing queued and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.loading.is_empty()
    }

    pub fn has_factory(
        &self,
        id: ModuleId,
    ) -> bool {
        self.factories.contains_key(&id)
    }

    /// Queue a module for loading.
    ///
    /// Loaded, failed, in-flight and already queued modules are skipped, as
    /// are entry callers (they are only queued by [`Scheduler::suspend`]).
    pub fn enqueue(
        &mut self,
        graph: &mut ModuleGraph,
        id: ModuleId,
    ) -> bool {
        let Some(module) = graph.get_mut(id) else {
            return false;
        };
        if module.state().is_terminal()
            || module.kind() == ModuleKind::Entry
            || self.loading.contains(&id)
            || self.queue.contains(id)
        {
            return false;
        }
        module.advance(ModuleState::Queued);
        self.queue.push(id)
    }

    /// Suspend `caller` until `target` is satisfied.
    ///
    /// The target is queued ahead of the caller.
    pub fn suspend(
        &mut self,
        graph: &mut ModuleGraph,
        caller: ModuleId,
        target: ModuleId,
        continuation: Continuation,
    ) {
        self.enqueue(graph, target);
        self.loading.remove(&caller);
        self.continuations.entry(caller).or_default().push(continuation);
        if let Some(module) = graph.get_mut(caller) {
            module.advance(ModuleState::Queued);
        }
        self.queue.push(caller);
    }

    /// Register the factory of a defined module.
    pub fn register_factory(
        &mut self,
        id: ModuleId,
        deps: Vec<ModuleId>,
        factory: Factory,
    ) {
        self.factories.insert(id, PendingFactory { deps, factory });
    }

    /// Mark a module as started outside the queue (entry callers).
    pub fn mark_loading(
        &mut self,
        id: ModuleId,
    ) {
        self.loading.insert(id);
    }

    /// Wait until `id` is loaded or failed.
    pub fn watch(
        &mut self,
        id: ModuleId,
    ) -> Waiter {
        let (tx, rx) = oneshot::channel();
        self.watchers.entry(id).or_default().push(tx);
        rx
    }

    /// Pick the next unit of work.
    ///
    /// Scans the queue in FIFO order, dropping stale entries, and starts the
    /// first module whose dependencies are all loaded or allowed partial.
    pub fn next(
        &mut self,
        graph: &mut ModuleGraph,
    ) -> Step {
        let queued: Vec<ModuleId> = self.queue.iter().collect();
        for id in queued {
            let Some((state, kind, location)) = graph
                .get(id)
                .map(|m| (m.state(), m.kind(), m.location().map(str::to_string)))
            else {
                self.queue.remove(id);
                continue;
            };
            if state.is_terminal() {
                self.queue.remove(id);
                continue;
            }

            if let Some(error) = blocking_failure(graph, id) {
                let ids = self.fail(graph, id, error);
                return Step::Failed { ids };
            }
            if !graph.is_ready(id) {
                continue;
            }

            if let Some(continuations) = self.continuations.remove(&id) {
                self.start(graph, id);
                return Step::Resume { id, continuations };
            }

            if let Some(pending) = self.factories.remove(&id) {
                let args = pending
                    .deps
                    .iter()
                    .map(|&dep| {
                        graph
                            .get(dep)
                            .map(|m| m.partial_exports().clone())
                            .unwrap_or_default()
                    })
                    .collect();
                if let Some(module) = graph.get_mut(id) {
                    module.record_attempt();
                }
                self.start(graph, id);
                return Step::RunFactory {
                    id,
                    factory: pending.factory,
                    args,
                };
            }

            match (kind, location) {
                (ModuleKind::Script, Some(location)) => {
                    if let Some(module) = graph.get_mut(id) {
                        module.record_attempt();
                    }
                    self.start(graph, id);
                    return Step::Fetch { id, location };
                }
                // defined module still waiting for its factory
                _ => continue,
            }
        }

        if self.queue.is_empty() {
            return Step::Idle;
        }
        if !self.loading.is_empty() {
            return Step::Waiting;
        }
        match self.stall_seed(graph) {
            Some(seed) => Step::Stall { seed },
            None => Step::Idle,
        }
    }

    fn start(
        &mut self,
        graph: &mut ModuleGraph,
        id: ModuleId,
    ) {
        self.queue.remove(id);
        self.loading.insert(id);
        if let Some(module) = graph.get_mut(id) {
            module.advance(ModuleState::Loading);
        }
    }

    /// Last requester of the first queued module that has one, else the
    /// first queued module.
    fn stall_seed(
        &self,
        graph: &ModuleGraph,
    ) -> Option<ModuleId> {
        self.queue
            .iter()
            .find_map(|id| graph.get(id).and_then(|m| m.last_requester()))
            .or_else(|| self.queue.iter().next())
    }

    /// Resolve a stall by breaking cycles (or failing, in throw mode).
    pub fn resolve_stall(
        &mut self,
        graph: &mut ModuleGraph,
        seed: ModuleId,
        throw_on_cycle: bool,
    ) -> StallOutcome {
        let mut seeds = vec![seed];
        seeds.extend(self.queue.iter().filter(|&id| id != seed));

        for seed in seeds {
            let cycles = CycleResolver::new(graph).find_cycles(seed);
            if cycles.is_empty() {
                continue;
            }

            if throw_on_cycle {
                let cycle = cycles[0].clone();
                let error = LoadError::CyclicDependency {
                    cycle: cycle.names(graph),
                };
                let mut failed = Vec::new();
                for &member in cycle.members() {
                    failed.extend(self.fail(graph, member, error.clone()));
                }
                return StallOutcome::Thrown { cycle, failed };
            }

            let mut granted = Vec::new();
            for cycle in &cycles {
                if let Some((holder, dependency)) = cycle.break_edge() {
                    if graph.allow_partial(holder, dependency) {
                        granted.push((holder, dependency));
                    }
                }
            }
            if granted.is_empty() {
                continue;
            }
            for cycle in &cycles {
                for &member in cycle.members() {
                    self.enqueue(graph, member);
                }
            }
            self.rerun = true;
            return StallOutcome::Broken { cycles, granted };
        }

        let pending: Vec<String> = self.queue.iter().map(|id| graph.name_of(id)).collect();
        let error = LoadError::Deadlock { pending };
        let mut failed = Vec::new();
        for id in self.queue.drain() {
            failed.extend(self.fail(graph, id, error.clone()));
        }
        StallOutcome::Deadlock { failed }
    }

    /// Mark a module loaded and notify its watchers.
    pub fn finish(
        &mut self,
        graph: &mut ModuleGraph,
        id: ModuleId,
    ) -> bool {
        let Some(module) = graph.get_mut(id) else {
            return false;
        };
        if !module.advance(ModuleState::Loaded) {
            return false;
        }
        let kind = module.kind();
        self.loading.remove(&id);
        self.queue.remove(id);
        if kind != ModuleKind::Entry {
            self.load_order.push(id);
        }
        self.notify(id, Ok(()));
        true
    }

    /// Put a module back at the front of the queue to retry at its next candidate.
    pub fn retry(
        &mut self,
        graph: &mut ModuleGraph,
        id: ModuleId,
    ) {
        self.loading.remove(&id);
        if let Some(module) = graph.get_mut(id) {
            module.reset_exports();
            module.advance(ModuleState::Queued);
        }
        self.queue.push_front(id);
    }

    /// Fail `id` terminally and propagate to every queued module blocked on it.
    ///
    /// Returns every module that failed, `id` first.
    pub fn fail(
        &mut self,
        graph: &mut ModuleGraph,
        id: ModuleId,
        error: LoadError,
    ) -> Vec<ModuleId> {
        let mut failed = Vec::new();
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let Some(module) = graph.get_mut(current) else {
                continue;
            };
            if module.state() == ModuleState::Failed {
                continue;
            }
            if module.state() == ModuleState::Loaded {
                continue;
            }
            module.mark_failed(error.clone());
            tracing::debug!(module = %module.name(), %error, "module failed");

            self.queue.remove(current);
            self.loading.remove(&current);
            self.factories.remove(&current);
            for continuation in self.continuations.remove(&current).unwrap_or_default() {
                let _ = continuation.send(Err(error.clone()));
            }
            self.notify(current, Err(error.clone()));
            failed.push(current);

            let blocked = self.queue.iter().filter(|&queued| {
                graph
                    .get(queued)
                    .map(|m| m.dependencies().contains(&current) && !m.is_allowed_partial(current))
                    .unwrap_or(false)
            });
            pending.extend(blocked.collect::<Vec<_>>().into_iter().rev());
        }
        failed
    }

    fn notify(
        &mut self,
        id: ModuleId,
        result: Result<(), LoadError>,
    ) {
        for watcher in self.watchers.remove(&id).unwrap_or_default() {
            let _ = watcher.send(result.clone());
        }
    }

    /// Enter the pump loop. A re-entrant call only requests another pass.
    pub fn begin_pump(&mut self) -> bool {
        if self.draining {
            self.rerun = true;
            return false;
        }
        self.draining = true;
        true
    }

    /// Whether another pass was requested since the last call.
    pub fn take_rerun(&mut self) -> bool {
        std::mem::take(&mut self.rerun)
    }

    pub fn end_pump(&mut self) {
        self.draining = false;
        self.rerun = false;
    }
}

/// Error of a failed dependency that `id` is still waiting on.
fn blocking_failure(
    graph: &ModuleGraph,
    id: ModuleId,
) -> Option<LoadError> {
    let module = graph.get(id)?;
    module
        .dependencies()
        .iter()
        .filter(|&&dep| !module.is_allowed_partial(dep))
        .filter_map(|&dep| graph.get(dep))
        .find(|dep| dep.state() == ModuleState::Failed)
        .and_then(|dep| dep.error().cloned())
}
