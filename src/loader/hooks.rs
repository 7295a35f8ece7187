//! Observational hooks
//!
//! Every interesting step of resolution is reported as a [`LoaderEvent`].
//! Events are buffered while the loader holds its internal state and are
//! dispatched afterwards, so a hook can never change what gets scheduled.

use std::cell::RefCell;
use std::rc::Rc;

use crate::module::{LoadError, ModuleId};

/// A single step of resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderEvent {
    /// `require` was called.
    BeforeRequire { caller: ModuleId, request: String },
    /// `require` returned (possibly with partial exports).
    AfterRequire {
        caller: ModuleId,
        request: String,
        outcome: Result<ModuleId, LoadError>,
    },
    /// `define` was called.
    BeforeDefine {
        name: Option<String>,
        deps: Vec<String>,
    },
    /// `define` registered its module.
    AfterDefine { module: ModuleId, name: String },
    /// A new edge `from -> to` was recorded.
    DependencyAdded { from: ModuleId, to: ModuleId },
    /// A module body or factory is about to run.
    LoadStarted {
        module: ModuleId,
        name: String,
        location: Option<String>,
        attempt: usize,
    },
    /// A module reached `Loaded`.
    Loaded { module: ModuleId, name: String },
    /// A load attempt failed.
    LoadFailed {
        module: ModuleId,
        name: String,
        error: LoadError,
        will_retry: bool,
    },
    /// A cycle was found while the queue was stalled.
    CycleDetected {
        members: Vec<ModuleId>,
        names: Vec<String>,
    },
    /// `holder` may now consume `dependency` before it is loaded.
    PartialAllowed {
        holder: ModuleId,
        dependency: ModuleId,
    },
}

/// Receives loader events.
pub trait LoaderHooks {
    fn on_event(
        &self,
        event: &LoaderEvent,
    );
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHooks;

impl LoaderHooks for TracingHooks {
    fn on_event(
        &self,
        event: &LoaderEvent,
    ) {
        match event {
            LoaderEvent::BeforeRequire { caller, request } => {
                tracing::debug!(%caller, %request, "require");
            }
            LoaderEvent::AfterRequire {
                caller,
                request,
                outcome,
            } => match outcome {
                Ok(module) => tracing::debug!(%caller, %request, %module, "require done"),
                Err(error) => tracing::debug!(%caller, %request, %error, "require failed"),
            },
            LoaderEvent::BeforeDefine { name, deps } => {
                tracing::debug!(name = name.as_deref().unwrap_or("<anonymous>"), ?deps, "define");
            }
            LoaderEvent::AfterDefine { module, name } => {
                tracing::debug!(%module, %name, "defined");
            }
            LoaderEvent::DependencyAdded { from, to } => {
                tracing::trace!(%from, %to, "dependency added");
            }
            LoaderEvent::LoadStarted {
                name,
                location,
                attempt,
                ..
            } => {
                tracing::debug!(%name, location = location.as_deref().unwrap_or("-"), attempt, "loading");
            }
            LoaderEvent::Loaded { name, .. } => {
                tracing::info!(%name, "loaded");
            }
            LoaderEvent::LoadFailed {
                name,
                error,
                will_retry,
                ..
            } => {
                if *will_retry {
                    tracing::debug!(%name, %error, "load failed, trying next path");
                } else {
                    tracing::warn!(%name, %error, "load failed");
                }
            }
            LoaderEvent::CycleDetected { names, .. } => {
                tracing::info!(cycle = %names.join(" -> "), "cycle detected");
            }
            LoaderEvent::PartialAllowed { holder, dependency } => {
                tracing::debug!(%holder, %dependency, "partial exports allowed");
            }
        }
    }
}

/// Records events in order.
///
/// Clones share the same log.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    events: Rc<RefCell<Vec<LoaderEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events so far
    pub fn events(&self) -> Vec<LoaderEvent> {
        self.events.borrow().clone()
    }

    /// Names of modules in the order they were loaded
    pub fn loaded(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                LoaderEvent::Loaded { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of events matching `predicate`
    pub fn count(
        &self,
        predicate: impl Fn(&LoaderEvent) -> bool,
    ) -> usize {
        self.events.borrow().iter().filter(|e| predicate(e)).count()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl LoaderHooks for EventLog {
    fn on_event(
        &self,
        event: &LoaderEvent,
    ) {
        self.events.borrow_mut().push(event.clone());
    }
}
