//! Runtime system
//!
//! Scheduling of module loads and resolution of circular dependencies.

pub mod cycle;
pub mod scheduler;

pub use cycle::{Cycle, CycleResolver};
pub use scheduler::{Factory, Scheduler, StallOutcome, Step, WorkQueue};
