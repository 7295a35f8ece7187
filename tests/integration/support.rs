//! Shared helpers for loader tests

#![allow(dead_code)]

use std::future::Future;

use stratum::{module_body, EventLog, Loader, LoaderConfig, MemoryFetcher, ModuleBody, ModuleId};

/// Run `future` on a current-thread runtime inside a `LocalSet`.
pub fn block_on<F: Future>(future: F) -> F::Output {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    tokio::task::LocalSet::new().block_on(&rt, future)
}

/// Body that exports its `name`, then requires each of `deps` in order.
pub fn requiring(
    name: &str,
    deps: &[&str],
) -> ModuleBody {
    let name = name.to_string();
    let deps: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
    module_body(move |ctx| {
        let name = name.clone();
        let deps = deps.clone();
        async move {
            ctx.exports().set("name", name);
            for dep in &deps {
                ctx.require(dep).await?;
            }
            Ok(())
        }
    })
}

/// Loader over `fetcher` with an attached event log.
pub fn loader_with(
    fetcher: &MemoryFetcher,
    config: LoaderConfig,
) -> (Loader, EventLog) {
    let loader = Loader::new(config, fetcher.clone());
    let log = EventLog::new();
    loader.add_hooks(log.clone());
    (loader, log)
}

/// Loader searching `/lib/` only.
pub fn lib_loader(fetcher: &MemoryFetcher) -> (Loader, EventLog) {
    loader_with(fetcher, LoaderConfig::with_search_paths(["/lib/"]))
}

pub fn names(
    loader: &Loader,
    ids: &[ModuleId],
) -> Vec<String> {
    ids.iter().map(|&id| loader.name_of(id)).collect()
}

/// Id of the module named `name`, panicking when it was never created.
pub fn id_of(
    loader: &Loader,
    name: &str,
) -> ModuleId {
    loader
        .lookup(name)
        .unwrap_or_else(|| panic!("no module named {}", name))
}
