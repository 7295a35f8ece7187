//! Manifest modules on disk
//!
//! `ManifestFetcher` end to end, with configuration read from TOML.

use std::fs;
use std::path::Path;

use serde_json::json;
use stratum::{LoadError, Loader, LoaderConfig, LoaderEvent, ManifestFetcher, ModuleState};

use crate::support::block_on;

fn write(
    dir: &Path,
    name: &str,
    content: &str,
) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// Search paths end with `/`.
fn as_dir(dir: &Path) -> String {
    format!("{}/", dir.display())
}

fn manifest_config(dir: &Path) -> LoaderConfig {
    LoaderConfig {
        extension: ".json".to_string(),
        ..LoaderConfig::with_search_paths([as_dir(dir), as_dir(&dir.join("vendor"))])
    }
}

#[test]
fn test_manifest_tree_with_cycle() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "main.json",
        r#"{ "requires": ["./a", "shared"], "exports": { "name": "main" } }"#,
    );
    write(dir.path(), "a.json", r#"{ "requires": ["./b"], "exports": { "name": "a" } }"#);
    write(dir.path(), "b.json", r#"{ "requires": ["./a"], "exports": { "name": "b" } }"#);
    write(dir.path(), "vendor/shared.json", r#"{ "exports": { "version": 2 } }"#);

    let loader = Loader::new(manifest_config(dir.path()), ManifestFetcher::new());
    let log = stratum::EventLog::new();
    loader.add_hooks(log.clone());

    let main = block_on(async {
        let main = loader.require("main").await;
        loader.wait_idle().await;
        main
    })
    .unwrap();

    assert_eq!(main.get("name"), Some(json!("main")));
    let deps = main.get("$deps").unwrap();
    assert_eq!(deps["shared"], json!({ "version": 2 }));
    assert_eq!(deps["./a"]["name"], json!("a"));

    for module in loader.modules() {
        assert_eq!(module.state(), ModuleState::Loaded, "{}", module.name());
    }
    let shared = loader.lookup("shared").unwrap();
    let location = loader.module(shared).unwrap().location().unwrap().to_string();
    assert!(location.ends_with("/vendor/shared.json"));
    assert_eq!(log.count(|e| matches!(e, LoaderEvent::PartialAllowed { .. })), 1);
}

#[test]
fn test_manifest_error_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "m.json", r#"{ "error": "not this one", "exports": { "stale": 1 } }"#);
    write(dir.path(), "vendor/m.json", r#"{ "exports": { "ok": true } }"#);

    let loader = Loader::new(manifest_config(dir.path()), ManifestFetcher::new());
    let m = block_on(loader.require("m")).unwrap();

    assert_eq!(m.get("ok"), Some(json!(true)));
    assert!(!m.contains("stale"));
    assert_eq!(loader.module(loader.lookup("m").unwrap()).unwrap().attempts(), 2);
}

#[test]
fn test_unparsable_manifest_fails() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "bad.json", "{ requires: ");

    let config = LoaderConfig {
        extension: ".json".to_string(),
        ..LoaderConfig::with_search_paths([as_dir(dir.path())])
    };
    let loader = Loader::new(config, ManifestFetcher::new());
    let result = block_on(loader.require("bad"));

    match result {
        Err(LoadError::LoadFailure { module, attempts, reason, .. }) => {
            assert_eq!(module, "bad.json");
            assert_eq!(attempts, 1);
            assert!(reason.contains("failed to parse"));
        }
        other => panic!("expected LoadFailure, got {:?}", other),
    }
}

#[test]
fn test_config_file_enables_throw_on_cycle() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.json", r#"{ "requires": ["b"] }"#);
    write(dir.path(), "b.json", r#"{ "requires": ["a"] }"#);
    let toml = format!(
        "search_paths = [\"{}\"]\nthrow_on_cycle = true\nextension = \".json\"\n",
        as_dir(dir.path())
    );
    write(dir.path(), "stratum.toml", &toml);

    let config = LoaderConfig::load(dir.path().join("stratum.toml")).unwrap();
    assert!(config.throw_on_cycle);

    let loader = Loader::new(config, ManifestFetcher::new());
    let result = block_on(loader.require("a"));

    assert!(matches!(result, Err(LoadError::CyclicDependency { ref cycle }) if cycle.len() == 2));
}

#[test]
fn test_manifest_fetcher_with_root() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "lib/app.json", r#"{ "requires": ["./util"], "exports": { "name": "app" } }"#);
    write(dir.path(), "lib/util.json", r#"{ "exports": { "name": "util" } }"#);

    let config = LoaderConfig {
        extension: ".json".to_string(),
        ..LoaderConfig::with_search_paths(["/lib/"])
    };
    let loader = Loader::new(config, ManifestFetcher::with_root(dir.path()));
    let app = block_on(loader.require("app")).unwrap();

    assert_eq!(app.get("$deps").unwrap()["./util"]["name"], json!("util"));
    assert!(loader.lookup("/lib/util.json").is_some());
}
