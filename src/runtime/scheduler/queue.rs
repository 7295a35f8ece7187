//! Work queue for the scheduler
//!
//! FIFO of module ids with set semantics: a module appears at most once.

use std::collections::{HashSet, VecDeque};

use crate::module::ModuleId;

/// FIFO queue of modules waiting to be started or resumed.
#[derive(Debug, Default, Clone)]
pub struct WorkQueue {
    order: VecDeque<ModuleId>,
    members: HashSet<ModuleId>,
}

impl WorkQueue {
    /// Create a new empty queue.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a module to the back. Returns `false` if it is already queued.
    pub fn push(
        &mut self,
        id: ModuleId,
    ) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.order.push_back(id);
        true
    }

    /// Push a module to the front (retry with the next candidate path).
    ///
    /// An already queued module is moved to the front.
    pub fn push_front(
        &mut self,
        id: ModuleId,
    ) {
        if !self.members.insert(id) {
            self.order.retain(|&queued| queued != id);
        }
        self.order.push_front(id);
    }

    /// Remove a module wherever it sits. Returns `false` if it was not queued.
    pub fn remove(
        &mut self,
        id: ModuleId,
    ) -> bool {
        if !self.members.remove(&id) {
            return false;
        }
        self.order.retain(|&queued| queued != id);
        true
    }

    #[inline]
    pub fn contains(
        &self,
        id: ModuleId,
    ) -> bool {
        self.members.contains(&id)
    }

    /// Queued modules, front first.
    pub fn iter(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.order.iter().copied()
    }

    /// Take every queued module, front first.
    pub fn drain(&mut self) -> Vec<ModuleId> {
        self.members.clear();
        self.order.drain(..).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
