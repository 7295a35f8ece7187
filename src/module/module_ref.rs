//! ModuleRef - identity and resolution state of one requestable module
//!
//! A `ModuleRef` is created the first time any caller resolves a logical id
//! and lives as long as its loader. Its `dependencies` are the "depends-on"
//! edges of the dependency graph; they only ever grow.

use std::collections::VecDeque;
use std::fmt;

use indexmap::IndexSet;

use super::exports::Exports;
use super::id::ModuleId;
use super::LoadError;

/// Resolution state of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleState {
    /// Known, but never scheduled.
    Unresolved,
    /// Waiting in the work queue (first time, suspended in `require`, or retrying).
    Queued,
    /// Being fetched, or its body/factory is running.
    Loading,
    /// Finished; exports are final.
    Loaded,
    /// Terminally failed; later requires re-raise the stored error.
    Failed,
}

impl ModuleState {
    /// Check whether the scheduler may move a module from `self` to `next`.
    ///
    /// `Loading -> Queued` covers both suspension inside `require` and a retry
    /// with the next candidate path.
    pub fn can_advance_to(
        self,
        next: ModuleState,
    ) -> bool {
        use ModuleState::*;
        matches!(
            (self, next),
            (Unresolved, Queued)
                | (Unresolved, Loading)
                | (Unresolved, Failed)
                | (Queued, Loading)
                | (Queued, Failed)
                | (Loading, Queued)
                | (Loading, Loaded)
                | (Loading, Failed)
                | (Failed, Queued)
        )
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, ModuleState::Loaded | ModuleState::Failed)
    }
}

impl fmt::Display for ModuleState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            ModuleState::Unresolved => "unresolved",
            ModuleState::Queued => "queued",
            ModuleState::Loading => "loading",
            ModuleState::Loaded => "loaded",
            ModuleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a module gets its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// Fetched from a resolved location and executed.
    Script,
    /// Created by `define`; runs a factory once its dependencies are satisfied.
    Defined,
    /// Synthetic caller behind a top-level `Loader::require`.
    Entry,
}

/// Identity plus resolution state for one module.
#[derive(Debug, Clone)]
pub struct ModuleRef {
    id: ModuleId,
    name: String,
    kind: ModuleKind,
    /// Base paths not tried yet, front first.
    candidate_paths: VecDeque<String>,
    location: Option<String>,
    state: ModuleState,
    dependencies: IndexSet<ModuleId>,
    requesters: IndexSet<ModuleId>,
    last_requester: Option<ModuleId>,
    allowed_partial: IndexSet<ModuleId>,
    exports: Exports,
    attempts: usize,
    error: Option<LoadError>,
}

impl ModuleRef {
    /// Create a module that will be fetched from one of `candidate_paths`.
    pub fn script(
        id: ModuleId,
        name: impl Into<String>,
        candidate_paths: impl IntoIterator<Item = String>,
    ) -> Self {
        Self::with_kind(id, name.into(), ModuleKind::Script, candidate_paths.into_iter().collect())
    }

    /// Create a module whose body is a `define` factory.
    ///
    /// A defined module is located at its own name, so relative dependencies
    /// resolve next to it.
    pub fn defined(
        id: ModuleId,
        name: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let mut module = Self::with_kind(id, name.clone(), ModuleKind::Defined, VecDeque::new());
        module.location = Some(name);
        module
    }

    /// Create an anonymous module (`define` without a name, or an entry caller).
    pub fn anonymous(
        id: ModuleId,
        kind: ModuleKind,
    ) -> Self {
        let label = match kind {
            ModuleKind::Entry => "entry",
            _ => "inline",
        };
        Self::with_kind(id, format!("{{{} {}}}", label, id.value()), kind, VecDeque::new())
    }

    fn with_kind(
        id: ModuleId,
        name: String,
        kind: ModuleKind,
        candidate_paths: VecDeque<String>,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            candidate_paths,
            location: None,
            state: ModuleState::Unresolved,
            dependencies: IndexSet::new(),
            requesters: IndexSet::new(),
            last_requester: None,
            allowed_partial: IndexSet::new(),
            exports: Exports::new(),
            attempts: 0,
            error: None,
        }
    }

    #[inline]
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Request string the module was created for, extension applied.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    #[inline]
    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Currently resolved location, if any.
    #[inline]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Base paths that have not been tried yet.
    pub fn candidate_paths(&self) -> impl Iterator<Item = &str> {
        self.candidate_paths.iter().map(String::as_str)
    }

    /// Dependencies in first-discovered order.
    pub fn dependencies(&self) -> &IndexSet<ModuleId> {
        &self.dependencies
    }

    /// Callers that asked for this module, earliest first.
    pub fn requesters(&self) -> &IndexSet<ModuleId> {
        &self.requesters
    }

    /// The earliest requester, used for error attribution.
    pub fn original_requester(&self) -> Option<ModuleId> {
        self.requesters.first().copied()
    }

    /// Most recent requester that is not an entry caller.
    pub fn last_requester(&self) -> Option<ModuleId> {
        self.last_requester
    }

    /// Dependencies this module may consume before they are loaded.
    pub fn allowed_partial(&self) -> &IndexSet<ModuleId> {
        &self.allowed_partial
    }

    #[inline]
    pub fn is_allowed_partial(
        &self,
        dependency: ModuleId,
    ) -> bool {
        self.allowed_partial.contains(&dependency)
    }

    /// Final exports; `None` until the module is loaded.
    pub fn exports(&self) -> Option<&Exports> {
        match self.state {
            ModuleState::Loaded => Some(&self.exports),
            _ => None,
        }
    }

    /// Exports handle regardless of state (possibly incomplete).
    pub(crate) fn partial_exports(&self) -> &Exports {
        &self.exports
    }

    /// Number of fetch attempts made so far.
    #[inline]
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Terminal error, set once the module is `Failed`.
    pub fn error(&self) -> Option<&LoadError> {
        self.error.as_ref()
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.state == ModuleState::Loaded
    }

    /// Move to `next`, returning `false` for transitions the scheduler never makes.
    pub(crate) fn advance(
        &mut self,
        next: ModuleState,
    ) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_advance_to(next) {
            tracing::warn!(module = %self.name, from = %self.state, to = %next, "rejected state transition");
            return false;
        }
        self.state = next;
        true
    }

    pub(crate) fn mark_failed(
        &mut self,
        error: LoadError,
    ) {
        self.state = ModuleState::Failed;
        self.error = Some(error);
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Record the edge `self -> dependency`. Returns `false` if it already existed.
    pub(crate) fn add_dependency(
        &mut self,
        dependency: ModuleId,
    ) -> bool {
        self.dependencies.insert(dependency)
    }

    pub(crate) fn add_requester(
        &mut self,
        requester: ModuleId,
        counts_as_last: bool,
    ) {
        self.requesters.insert(requester);
        if counts_as_last {
            self.last_requester = Some(requester);
        }
    }

    /// Grant permission to consume `dependency` before it is loaded.
    pub(crate) fn allow_partial(
        &mut self,
        dependency: ModuleId,
    ) -> bool {
        self.allowed_partial.insert(dependency)
    }

    /// Take the next candidate base path, if any.
    pub(crate) fn pop_candidate(&mut self) -> Option<String> {
        self.candidate_paths.pop_front()
    }

    pub(crate) fn set_location(
        &mut self,
        location: Option<String>,
    ) -> Option<String> {
        std::mem::replace(&mut self.location, location)
    }

    /// Turn a not-yet-started script into a defined module.
    pub(crate) fn convert_to_defined(&mut self) {
        self.kind = ModuleKind::Defined;
        self.candidate_paths.clear();
    }

    /// Fresh exports for a retry; values from a failed run are discarded.
    pub(crate) fn reset_exports(&mut self) {
        self.exports = Exports::new();
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.name)
    }
}
