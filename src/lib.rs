//! Stratum module loader
//!
//! Loads modules on demand, records the dependency graph between them as it is
//! discovered, schedules loads so dependencies finish before their dependents
//! resume, and breaks circular dependencies instead of stalling.
//!
//! # Example
//!
//! ```no_run
//! use stratum::{module_body, Loader, LoaderConfig, MemoryFetcher};
//!
//! let fetcher = MemoryFetcher::new();
//! fetcher.insert(
//!     "/lib/a.js",
//!     module_body(|ctx| async move {
//!         ctx.exports().set("name", "a");
//!         let b = ctx.require("./b").await?;
//!         ctx.exports().set("peer", b.get("name").unwrap_or_default());
//!         Ok(())
//!     }),
//! );
//! fetcher.insert_value("/lib/b.js", serde_json::json!({ "name": "b" }));
//!
//! let loader = Loader::new(LoaderConfig::with_search_paths(["/lib/"]), fetcher);
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! let local = tokio::task::LocalSet::new();
//! let a = local.block_on(&rt, loader.require("a")).unwrap();
//! assert_eq!(a.get("peer"), Some(serde_json::json!("b")));
//! ```

#![warn(rust_2018_idioms)]

pub mod loader;
pub mod module;
pub mod runtime;
pub mod util;

// Re-exports
pub use loader::{EventLog, Loader, LoaderEvent, LoaderHooks, ModuleContext, TracingHooks};
pub use module::{
    module_body, Exports, FetchError, LoadError, ManifestFetcher, MemoryFetcher, ModuleBody,
    ModuleFetcher, ModuleId, ModuleKind, ModuleRef, ModuleState,
};
pub use util::config::LoaderConfig;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "stratum";
