//! Module identity
//!
//! Every requestable module gets a `ModuleId` the first time any caller
//! resolves it. Ids are handed out in creation order, which is the order the
//! cycle resolver uses when it needs a "minimum identity".

use std::fmt;

/// Stable identity of a module within one [`Loader`](crate::loader::Loader).
///
/// Ids index straight into the module graph, so they are only meaningful for
/// the loader instance that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(pub usize);

impl ModuleId {
    /// Create a new `ModuleId` with the given value.
    ///
    /// # Examples
    ///
    /// ```
    /// use stratum::module::ModuleId;
    ///
    /// let id = ModuleId::new(3);
    /// assert_eq!(id.value(), 3);
    /// ```
    #[inline]
    pub fn new(value: usize) -> Self {
        ModuleId(value)
    }

    /// Returns the inner value of the module id.
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

/// Generator for module ids.
///
/// The graph is owned by a single thread of control, so a plain counter is
/// enough here.
#[derive(Debug, Default)]
pub struct ModuleIdGenerator {
    next_id: usize,
}

impl ModuleIdGenerator {
    /// Create a new generator starting at zero.
    #[inline]
    pub fn new() -> Self {
        Self { next_id: 0 }
    }

    /// Allocate the next id.
    ///
    /// ```
    /// use stratum::module::ModuleIdGenerator;
    ///
    /// let mut generator = ModuleIdGenerator::new();
    /// let first = generator.generate();
    /// let second = generator.generate();
    /// assert!(first < second);
    /// ```
    #[inline]
    pub fn generate(&mut self) -> ModuleId {
        let id = ModuleId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Number of ids handed out so far.
    #[inline]
    pub fn issued(&self) -> usize {
        self.next_id
    }
}
