//! Stratum module loader - CLI

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use stratum::util::logger::{self, LogLevel};
use stratum::{Loader, LoaderConfig, ManifestFetcher, ModuleKind, ModuleRef, ModuleState, NAME, VERSION};

/// On-demand module loader with cycle breaking
#[derive(Parser, Debug)]
#[command(name = "stratum")]
#[command(author = "Stratum Team")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load manifest modules and print the load order
    Resolve {
        /// Entry modules
        #[arg(value_name = "ENTRY", required = true)]
        entries: Vec<PathBuf>,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// Load an entry module and print the discovered dependency graph
    Graph {
        /// Entry module
        #[arg(value_name = "ENTRY")]
        entry: PathBuf,

        #[command(flatten)]
        load: LoadArgs,
    },

    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// Search path for non-relative ids (repeatable)
    #[arg(short = 'p', long = "path", value_name = "PATH")]
    search_paths: Vec<String>,

    /// Config file (TOML)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Fail on circular dependencies instead of breaking them
    #[arg(long)]
    throw_on_cycle: bool,

    /// Extension appended to module ids
    #[arg(long, value_name = "EXT")]
    extension: Option<String>,

    /// Log every loader event
    #[arg(long)]
    trace: bool,
}

impl LoadArgs {
    /// Config file, then environment, then flags.
    fn config(
        &self,
        entries: &[PathBuf],
    ) -> Result<LoaderConfig> {
        let mut config = match &self.config {
            Some(path) => LoaderConfig::load(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => LoaderConfig {
                extension: ".json".to_string(),
                ..LoaderConfig::default()
            },
        };
        config.apply_env();

        if !self.search_paths.is_empty() {
            config.search_paths = self.search_paths.iter().map(|p| as_dir(p)).collect();
        }
        if config.search_paths.is_empty() {
            for entry in entries {
                let dir = entry_dir(entry);
                if !config.search_paths.contains(&dir) {
                    config.search_paths.push(dir);
                }
            }
        }
        if self.throw_on_cycle {
            config.throw_on_cycle = true;
        }
        if let Some(extension) = &self.extension {
            config.extension = extension.clone();
        }
        if self.trace {
            config.debug = true;
        }
        Ok(config)
    }
}

/// Search paths must end with `/` so the last segment is not taken as a file name.
fn as_dir(path: &str) -> String {
    if path.is_empty() || path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// Directory holding `entry`, as a search path. Empty for a bare file name.
fn entry_dir(entry: &Path) -> String {
    match entry.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => as_dir(&dir.to_string_lossy()),
        _ => String::new(),
    }
}

fn entry_request(entry: &Path) -> String {
    entry
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| entry.to_string_lossy().into_owned())
}

/// Load every entry; returns the loader and the entries that failed.
fn load(
    entries: &[PathBuf],
    config: LoaderConfig,
) -> Result<(Loader, Vec<String>)> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;
    let local = tokio::task::LocalSet::new();
    let loader = Loader::new(config, ManifestFetcher::new());

    let failures = local.block_on(&rt, async {
        let mut failures = Vec::new();
        for entry in entries {
            let request = entry_request(entry);
            match loader.require(&request).await {
                Ok(exports) => {
                    println!("{} {}", "entry".green().bold(), request);
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&exports.snapshot()).unwrap_or_default()
                    );
                }
                Err(error) => {
                    eprintln!("{} {}: {}", "error".red().bold(), request, error);
                    failures.push(request);
                }
            }
        }
        loader.wait_idle().await;
        failures
    });

    Ok((loader, failures))
}

fn print_module(module: &ModuleRef) {
    let location = module.location().unwrap_or("-");
    match module.state() {
        ModuleState::Loaded => println!("  {} {} ({})", "ok".green(), module.name(), location.dimmed()),
        ModuleState::Failed => {
            let error = module.error().map(ToString::to_string).unwrap_or_default();
            println!("  {} {} ({}): {}", "failed".red(), module.name(), location.dimmed(), error)
        }
        state => println!("  {} {} ({})", state.yellow(), module.name(), location.dimmed()),
    }
}

fn resolve(
    entries: &[PathBuf],
    args: &LoadArgs,
) -> Result<()> {
    let config = args.config(entries)?;
    let (loader, failures) = load(entries, config)?;

    println!("{}", "load order".bold());
    for (index, id) in loader.load_order().into_iter().enumerate() {
        if let Some(module) = loader.module(id) {
            println!("  {:>3}. {}", index + 1, module.name());
        }
    }

    println!("{}", "modules".bold());
    for module in loader.modules().iter().filter(|m| m.kind() != ModuleKind::Entry) {
        print_module(module);
    }

    if !failures.is_empty() {
        bail!("Failed to resolve: {}", failures.join(", "));
    }
    Ok(())
}

fn graph(
    entry: &Path,
    args: &LoadArgs,
) -> Result<()> {
    let entries = [entry.to_path_buf()];
    let config = args.config(&entries)?;
    let (loader, failures) = load(&entries, config)?;

    println!("{}", "dependencies".bold());
    for module in loader.modules().iter().filter(|m| m.kind() != ModuleKind::Entry) {
        let deps: Vec<String> = module.dependencies().iter().map(|&d| loader.name_of(d)).collect();
        if deps.is_empty() {
            println!("  {}", module.name());
        } else {
            println!("  {} -> {}", module.name(), deps.join(", "));
        }
        for &dep in module.allowed_partial() {
            println!("    {} {}", "partial".yellow(), loader.name_of(dep));
        }
    }

    if !failures.is_empty() {
        bail!("Failed to resolve: {}", failures.join(", "));
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut level = LogLevel::from_verbosity(cli.verbose);
    if let Commands::Resolve { load, .. } | Commands::Graph { load, .. } = &cli.command {
        if load.trace && cli.verbose < 2 {
            level = LogLevel::Debug;
        }
    }
    logger::init_with_level(level);

    match &cli.command {
        Commands::Resolve { entries, load } => resolve(entries, load)?,
        Commands::Graph { entry, load } => graph(entry, load)?,
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}
