//! Module loader
//!
//! [`Loader`] is the public surface: `require`, `define` and introspection.
//! It owns the module graph, the scheduler and the configuration of one
//! independent module environment.
//!
//! Everything is single-threaded. Module bodies run as `spawn_local` tasks,
//! so a loader must be driven from inside a [`tokio::task::LocalSet`]:
//!
//! ```no_run
//! use stratum::loader::Loader;
//! use stratum::module::{module_body, MemoryFetcher};
//! use stratum::util::config::LoaderConfig;
//!
//! let fetcher = MemoryFetcher::new();
//! fetcher.insert(
//!     "/lib/main.js",
//!     module_body(|ctx| async move {
//!         ctx.exports().set("ready", true);
//!         Ok(())
//!     }),
//! );
//! let loader = Loader::new(LoaderConfig::with_search_paths(["/lib/"]), fetcher);
//!
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! let local = tokio::task::LocalSet::new();
//! let exports = local.block_on(&rt, loader.require("main")).unwrap();
//! assert_eq!(exports.get("ready"), Some(serde_json::json!(true)));
//! ```

mod context;
pub mod hooks;

pub use context::ModuleContext;
pub use hooks::{EventLog, LoaderEvent, LoaderHooks, TracingHooks};

use std::cell::{RefCell, RefMut};
use std::rc::Rc;

use tokio::sync::{oneshot, Notify};

use crate::module::resolver::{is_relative, resolve_path, with_extension};
use crate::module::{
    Exports, LoadError, ModuleFetcher, ModuleGraph, ModuleId, ModuleKind, ModuleRef, ModuleState,
};
use crate::runtime::scheduler::Factory;
use crate::runtime::{Scheduler, StallOutcome, Step};
use crate::util::config::LoaderConfig;

/// How a request string becomes a module name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestMode {
    /// Append the configured extension; the caller gets the exports.
    Module,
    /// Use the request as written; the caller only waits for it to run.
    Include,
}

/// Mutable state of one loader.
struct LoaderState {
    config: LoaderConfig,
    graph: ModuleGraph,
    scheduler: Scheduler,
    /// Events waiting to be dispatched to hooks.
    events: Vec<LoaderEvent>,
}

impl LoaderState {
    fn emit(
        &mut self,
        event: LoaderEvent,
    ) {
        self.events.push(event);
    }

    /// Name of `id` unless it is an entry caller.
    fn caller_name(
        &self,
        id: ModuleId,
    ) -> Option<String> {
        self.graph
            .get(id)
            .filter(|m| m.kind() != ModuleKind::Entry)
            .map(|m| m.name().to_string())
    }

    /// Earliest requester of `id` that is a real module.
    fn original_requester(
        &self,
        id: ModuleId,
    ) -> Option<String> {
        let module = self.graph.get(id)?;
        module
            .requesters()
            .iter()
            .find_map(|&requester| self.caller_name(requester))
    }

    /// Find or create the module `request` names, as seen from `caller`.
    fn resolve(
        &mut self,
        caller: ModuleId,
        request: &str,
        mode: RequestMode,
    ) -> Result<ModuleId, LoadError> {
        let name = match mode {
            RequestMode::Module => with_extension(request, &self.config.extension),
            RequestMode::Include => request.to_string(),
        };
        if let Some(id) = self.graph.find_defined(&name) {
            return Ok(id);
        }

        let bases = if is_relative(request) {
            let base = self
                .graph
                .get(caller)
                .and_then(ModuleRef::location)
                .map(str::to_string)
                .unwrap_or_else(|| self.config.base.clone());
            vec![base]
        } else if name.starts_with('/') || name.contains("://") {
            vec![self.config.base.clone()]
        } else {
            self.config.search_paths.clone()
        };

        for base in &bases {
            let location = resolve_path(&name, base)?;
            if let Some(id) = self.graph.find_by_location(&location) {
                return Ok(id);
            }
        }

        let requester = self.caller_name(caller);
        let id = self.graph.insert_script(&name, bases, requester)?;
        tracing::trace!(module = %name, location = ?self.graph.get(id).and_then(ModuleRef::location), "new module");
        Ok(id)
    }

    /// Resolve `request` and record the edge `caller -> target`.
    fn resolve_and_link(
        &mut self,
        caller: ModuleId,
        request: &str,
        mode: RequestMode,
    ) -> Result<ModuleId, LoadError> {
        let target = self.resolve(caller, request, mode)?;
        if self.graph.add_edge(caller, target)? {
            self.emit(LoaderEvent::DependencyAdded {
                from: caller,
                to: target,
            });
        }
        Ok(target)
    }

    fn define(
        &mut self,
        name: Option<&str>,
        deps: &[&str],
        factory: Factory,
    ) -> Result<ModuleId, LoadError> {
        let id = match name {
            Some(name) => {
                let name = with_extension(name, &self.config.extension);
                if let Some(id) = self.graph.find_defined(&name) {
                    let started = self
                        .graph
                        .get(id)
                        .map(|m| !matches!(m.state(), ModuleState::Unresolved | ModuleState::Queued))
                        .unwrap_or(true);
                    if started || self.scheduler.has_factory(id) {
                        return Err(LoadError::AlreadyDefined { module: name });
                    }
                    id
                } else if let Some(id) = self.graph.find_pending_script(&name) {
                    self.graph.adopt_as_defined(id);
                    id
                } else {
                    self.graph.insert_defined(Some(&name))
                }
            }
            None => self.graph.insert_defined(None),
        };

        let mut dep_ids = Vec::with_capacity(deps.len());
        for dep in deps {
            match self.resolve_and_link(id, dep, RequestMode::Module) {
                Ok(target) => dep_ids.push(target),
                Err(error) => {
                    self.fail(id, error.clone());
                    return Err(error);
                }
            }
        }

        for &dep in &dep_ids {
            self.scheduler.enqueue(&mut self.graph, dep);
        }
        self.scheduler.register_factory(id, dep_ids, factory);
        self.scheduler.enqueue(&mut self.graph, id);

        let name = self.graph.name_of(id);
        self.emit(LoaderEvent::AfterDefine { module: id, name });
        Ok(id)
    }

    /// Record the outcome of a body or factory run.
    fn settle(
        &mut self,
        id: ModuleId,
        result: Result<(), LoadError>,
    ) {
        let Some(module) = self.graph.get(id) else {
            return;
        };
        if module.state().is_terminal() {
            return;
        }
        let kind = module.kind();
        let name = module.name().to_string();
        let attempts = module.attempts();

        match result {
            Ok(()) => {
                if self.scheduler.finish(&mut self.graph, id) {
                    self.emit(LoaderEvent::Loaded { module: id, name });
                }
            }
            Err(error) if error.is_retryable() && kind == ModuleKind::Script => {
                match self.graph.advance_candidate(id) {
                    Ok(true) => {
                        self.emit(LoaderEvent::LoadFailed {
                            module: id,
                            name,
                            error,
                            will_retry: true,
                        });
                        self.scheduler.retry(&mut self.graph, id);
                    }
                    Ok(false) => {
                        let failure = LoadError::LoadFailure {
                            module: name,
                            requester: self.original_requester(id),
                            attempts,
                            reason: error.to_string(),
                        };
                        self.fail(id, failure);
                    }
                    Err(path_error) => self.fail(id, path_error),
                }
            }
            Err(error) => self.fail(id, error),
        }
    }

    /// Fail `id` terminally (and everything blocked on it).
    fn fail(
        &mut self,
        id: ModuleId,
        error: LoadError,
    ) {
        let failed = self.scheduler.fail(&mut self.graph, id, error);
        self.emit_failures(&failed);
    }

    fn emit_failures(
        &mut self,
        ids: &[ModuleId],
    ) {
        for &id in ids {
            let Some(module) = self.graph.get(id) else {
                continue;
            };
            if module.kind() == ModuleKind::Entry {
                continue;
            }
            let Some(error) = module.error().cloned() else {
                continue;
            };
            let name = module.name().to_string();
            self.emit(LoaderEvent::LoadFailed {
                module: id,
                name,
                error,
                will_retry: false,
            });
        }
    }

    fn resolve_stall(
        &mut self,
        seed: ModuleId,
    ) {
        let throw_on_cycle = self.config.throw_on_cycle;
        match self
            .scheduler
            .resolve_stall(&mut self.graph, seed, throw_on_cycle)
        {
            StallOutcome::Broken { cycles, granted } => {
                for cycle in cycles {
                    let names = cycle.names(&self.graph);
                    self.emit(LoaderEvent::CycleDetected {
                        members: cycle.members().to_vec(),
                        names,
                    });
                }
                for (holder, dependency) in granted {
                    self.emit(LoaderEvent::PartialAllowed { holder, dependency });
                }
            }
            StallOutcome::Thrown { cycle, failed } => {
                let names = cycle.names(&self.graph);
                self.emit(LoaderEvent::CycleDetected {
                    members: cycle.members().to_vec(),
                    names,
                });
                self.emit_failures(&failed);
            }
            StallOutcome::Deadlock { failed } => {
                tracing::warn!(pending = failed.len(), "dependency resolution deadlocked");
                self.emit_failures(&failed);
            }
        }
    }
}

struct LoaderInner {
    state: RefCell<LoaderState>,
    fetcher: Rc<dyn ModuleFetcher>,
    hooks: RefCell<Vec<Rc<dyn LoaderHooks>>>,
    /// Signalled whenever a pump leaves the scheduler idle.
    idle: Notify,
}

/// Handle to one module environment. Clones share the same environment.
#[derive(Clone)]
pub struct Loader {
    inner: Rc<LoaderInner>,
}

impl Loader {
    /// Create a loader fetching module bodies through `fetcher`.
    ///
    /// `config.debug` attaches [`TracingHooks`].
    pub fn new(
        config: LoaderConfig,
        fetcher: impl ModuleFetcher + 'static,
    ) -> Self {
        let debug = config.debug;
        let loader = Self {
            inner: Rc::new(LoaderInner {
                state: RefCell::new(LoaderState {
                    config,
                    graph: ModuleGraph::new(),
                    scheduler: Scheduler::new(),
                    events: Vec::new(),
                }),
                fetcher: Rc::new(fetcher),
                hooks: RefCell::new(Vec::new()),
                idle: Notify::new(),
            }),
        };
        if debug {
            loader.add_hooks(TracingHooks);
        }
        loader
    }

    /// Attach an observer.
    pub fn add_hooks(
        &self,
        hooks: impl LoaderHooks + 'static,
    ) {
        self.inner.hooks.borrow_mut().push(Rc::new(hooks));
    }

    fn state(&self) -> RefMut<'_, LoaderState> {
        self.inner.state.borrow_mut()
    }

    /// Top-level `require`, resolved against `config.base` and the search paths.
    pub async fn require(
        &self,
        request: &str,
    ) -> Result<Exports, LoadError> {
        self.require_entry(request, RequestMode::Module).await
    }

    /// Load and run `url` as written, without appending the extension.
    ///
    /// For plain scripts that register globals or call `define` themselves.
    /// Their exports are not handed back.
    pub async fn include(
        &self,
        url: &str,
    ) -> Result<(), LoadError> {
        self.require_entry(url, RequestMode::Include).await.map(drop)
    }

    async fn require_entry(
        &self,
        request: &str,
        mode: RequestMode,
    ) -> Result<Exports, LoadError> {
        let entry = {
            let mut state = self.state();
            let entry = state.graph.insert_entry();
            state.scheduler.mark_loading(entry);
            entry
        };

        let result = self.require_from(entry, request, mode).await;

        {
            let mut guard = self.state();
            let state = &mut *guard;
            match &result {
                Ok(_) => {
                    state.scheduler.finish(&mut state.graph, entry);
                }
                Err(error) => {
                    state.scheduler.fail(&mut state.graph, entry, error.clone());
                }
            }
        }
        self.pump();
        result
    }

    /// `require` on behalf of `caller`.
    pub(crate) async fn require_from(
        &self,
        caller: ModuleId,
        request: &str,
        mode: RequestMode,
    ) -> Result<Exports, LoadError> {
        self.state().emit(LoaderEvent::BeforeRequire {
            caller,
            request: request.to_string(),
        });
        self.flush();

        let result = self.require_target(caller, request, mode).await;

        self.state().emit(LoaderEvent::AfterRequire {
            caller,
            request: request.to_string(),
            outcome: result.as_ref().map(|(id, _)| *id).map_err(Clone::clone),
        });
        self.flush();
        result.map(|(_, exports)| exports)
    }

    async fn require_target(
        &self,
        caller: ModuleId,
        request: &str,
        mode: RequestMode,
    ) -> Result<(ModuleId, Exports), LoadError> {
        let target = self.state().resolve_and_link(caller, request, mode)?;

        loop {
            let waiter = {
                let mut guard = self.state();
                let state = &mut *guard;

                if let Some(error) = state.graph.get(caller).and_then(ModuleRef::error) {
                    return Err(error.clone());
                }
                let Some(module) = state.graph.get(target) else {
                    return Err(LoadError::Aborted {
                        module: request.to_string(),
                    });
                };
                match module.state() {
                    ModuleState::Loaded => return Ok((target, module.partial_exports().clone())),
                    ModuleState::Failed => {
                        return Err(module.error().cloned().unwrap_or_else(|| LoadError::Aborted {
                            module: module.name().to_string(),
                        }));
                    }
                    _ => {}
                }
                let partial = state
                    .graph
                    .get(caller)
                    .map(|c| c.is_allowed_partial(target))
                    .unwrap_or(false);
                if partial {
                    return Ok((target, module.partial_exports().clone()));
                }

                let (tx, rx) = oneshot::channel();
                state
                    .scheduler
                    .suspend(&mut state.graph, caller, target, tx);
                rx
            };

            self.flush();
            self.pump();

            match waiter.await {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => return Err(error),
                Err(_) => {
                    return Err(LoadError::Aborted {
                        module: self.name_of(caller),
                    });
                }
            }
        }
    }

    /// Define `name` with a factory run once `deps` are satisfied.
    ///
    /// The factory receives the exports of `deps` in the order given; the
    /// entries it returns are merged into the module's exports.
    ///
    /// Only registers and queues: the queue is driven by the next `require`,
    /// `settled`, `wait_idle` or module completion, so consecutive defines can
    /// refer to each other in any order.
    pub fn define<F>(
        &self,
        name: &str,
        deps: &[&str],
        factory: F,
    ) -> Result<ModuleId, LoadError>
    where
        F: FnOnce(&[Exports]) -> Result<Exports, LoadError> + 'static,
    {
        self.define_module(Some(name), deps, Box::new(factory))
    }

    /// Run `factory` once `deps` are satisfied, without naming the result.
    pub fn define_anonymous<F>(
        &self,
        deps: &[&str],
        factory: F,
    ) -> Result<ModuleId, LoadError>
    where
        F: FnOnce(&[Exports]) -> Result<Exports, LoadError> + 'static,
    {
        self.define_module(None, deps, Box::new(factory))
    }

    fn define_module(
        &self,
        name: Option<&str>,
        deps: &[&str],
        factory: Factory,
    ) -> Result<ModuleId, LoadError> {
        let result = {
            let mut state = self.state();
            state.emit(LoaderEvent::BeforeDefine {
                name: name.map(str::to_string),
                deps: deps.iter().map(|d| d.to_string()).collect(),
            });
            state.define(name, deps, factory)
        };
        self.flush();
        result
    }

    /// Wait until `id` is loaded or has failed.
    pub async fn settled(
        &self,
        id: ModuleId,
    ) -> Result<(), LoadError> {
        let waiter = {
            let mut state = self.state();
            match state.graph.get(id) {
                None => {
                    return Err(LoadError::Aborted {
                        module: id.to_string(),
                    });
                }
                Some(module) => match module.state() {
                    ModuleState::Loaded => return Ok(()),
                    ModuleState::Failed => {
                        return Err(module.error().cloned().unwrap_or_else(|| LoadError::Aborted {
                            module: module.name().to_string(),
                        }));
                    }
                    _ => {}
                },
            }
            state.scheduler.watch(id)
        };
        self.pump();
        match waiter.await {
            Ok(result) => result,
            Err(_) => Err(LoadError::Aborted {
                module: self.name_of(id),
            }),
        }
    }

    /// Wait until nothing is queued or in flight.
    pub async fn wait_idle(&self) {
        self.pump();
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Drive the scheduler until it is idle or waiting on an in-flight load.
    ///
    /// This is the single re-entry point: a nested call only asks the running
    /// loop for another pass.
    fn pump(&self) {
        if !self.state().scheduler.begin_pump() {
            return;
        }

        loop {
            self.flush();
            let step = {
                let mut guard = self.state();
                let state = &mut *guard;
                state.scheduler.next(&mut state.graph)
            };

            match step {
                Step::Idle | Step::Waiting => {
                    let mut state = self.state();
                    if state.scheduler.take_rerun() {
                        continue;
                    }
                    state.scheduler.end_pump();
                    break;
                }
                Step::Fetch { id, location } => {
                    {
                        let mut state = self.state();
                        let name = state.graph.name_of(id);
                        let attempt = state.graph.get(id).map(ModuleRef::attempts).unwrap_or(1);
                        state.emit(LoaderEvent::LoadStarted {
                            module: id,
                            name,
                            location: Some(location.clone()),
                            attempt,
                        });
                    }
                    tokio::task::spawn_local(self.clone().run_module(id, location));
                }
                Step::Resume { id, continuations } => {
                    tracing::trace!(module = %id, pending = continuations.len(), "resuming");
                    let mut delivered = false;
                    for continuation in continuations {
                        delivered |= continuation.send(Ok(())).is_ok();
                    }
                    if !delivered {
                        let mut state = self.state();
                        let module = state.graph.name_of(id);
                        state.fail(id, LoadError::Aborted { module });
                    }
                }
                Step::RunFactory { id, factory, args } => {
                    {
                        let mut state = self.state();
                        let (name, location, attempt) = match state.graph.get(id) {
                            Some(m) => (m.name().to_string(), m.location().map(str::to_string), m.attempts()),
                            None => (id.to_string(), None, 1),
                        };
                        state.emit(LoaderEvent::LoadStarted {
                            module: id,
                            name,
                            location,
                            attempt,
                        });
                    }
                    self.flush();
                    let result = factory(&args);
                    let mut state = self.state();
                    let result = result.map(|exports| {
                        if let Some(module) = state.graph.get(id) {
                            module.partial_exports().merge_from(&exports);
                        }
                    });
                    state.settle(id, result);
                }
                Step::Failed { ids } => {
                    self.state().emit_failures(&ids);
                }
                Step::Stall { seed } => {
                    tracing::debug!(%seed, "queue stalled, looking for cycles");
                    self.state().resolve_stall(seed);
                }
            }
        }

        self.flush();
        if self.is_idle() {
            self.inner.idle.notify_waiters();
        }
    }

    async fn run_module(
        self,
        id: ModuleId,
        location: String,
    ) {
        let result = match self.inner.fetcher.fetch(&location).await {
            Ok(body) => {
                let exports = self
                    .state()
                    .graph
                    .get(id)
                    .map(|m| m.partial_exports().clone())
                    .unwrap_or_default();
                body(ModuleContext::new(self.clone(), id, exports)).await
            }
            Err(error) => Err(error.into()),
        };
        self.complete(id, result);
    }

    fn complete(
        &self,
        id: ModuleId,
        result: Result<(), LoadError>,
    ) {
        self.state().settle(id, result);
        self.flush();
        self.pump();
    }

    /// Dispatch buffered events with no internal borrow held.
    fn flush(&self) {
        loop {
            let events = std::mem::take(&mut self.state().events);
            if events.is_empty() {
                break;
            }
            let hooks: Vec<Rc<dyn LoaderHooks>> = self.inner.hooks.borrow().clone();
            for event in &events {
                for hook in &hooks {
                    hook.on_event(event);
                }
            }
        }
    }

    /// Snapshot of the configuration.
    pub fn config(&self) -> LoaderConfig {
        self.state().config.clone()
    }

    /// Snapshot of one module.
    pub fn module(
        &self,
        id: ModuleId,
    ) -> Option<ModuleRef> {
        self.state().graph.get(id).cloned()
    }

    pub fn name_of(
        &self,
        id: ModuleId,
    ) -> String {
        self.state().graph.name_of(id)
    }

    /// Find a module by defined name, location or request name.
    pub fn lookup(
        &self,
        name: &str,
    ) -> Option<ModuleId> {
        let state = self.state();
        state
            .graph
            .lookup(name)
            .or_else(|| state.graph.lookup(&with_extension(name, &state.config.extension)))
    }

    /// Exports of a loaded module.
    pub fn exports_of(
        &self,
        name: &str,
    ) -> Option<Exports> {
        let id = self.lookup(name)?;
        self.state().graph.get(id).and_then(ModuleRef::exports).cloned()
    }

    /// Snapshots of every module, in creation order.
    pub fn modules(&self) -> Vec<ModuleRef> {
        self.state().graph.iter().cloned().collect()
    }

    /// Modules in the order they reached `Loaded`.
    pub fn load_order(&self) -> Vec<ModuleId> {
        self.state().scheduler.load_order().to_vec()
    }

    pub fn queue_len(&self) -> usize {
        self.state().scheduler.queue().len()
    }

    /// Nothing queued and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.state().scheduler.is_idle()
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Loader")
            .field("modules", &state.graph.len())
            .field("queued", &state.scheduler.queue().len())
            .finish()
    }
}
