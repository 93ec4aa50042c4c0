// ABOUTME: Entry point for the dotstash binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and dispatches to the storage engine and resolver.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use dotstash_core::value::{self, Value};
use dotstash_core::{PrefixProbe, StashConfig};
use dotstash_interp::{Resolver, ShellRunner};
use dotstash_store::{ImportMode, StorageEngine};

#[derive(Parser)]
#[command(name = "dotstash", version, about = "Dot-path key/value stash with references")]
struct Cli {
    /// Data directory (overrides DOTSTASH_HOME)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a value or subtree, expanding references
    Get {
        key: String,
        /// Print the stored text without expanding references
        #[arg(long)]
        raw: bool,
    },
    /// Store a value at a dot path
    Set { key: String, value: String },
    /// Remove a value or subtree
    Rm { key: String },
    /// Move a value or subtree to a new path
    Mv { from: String, to: String },
    /// List stored paths, optionally under a prefix
    Ls { prefix: Option<String> },
    /// Find paths or values containing text
    Search { needle: String },
    /// Load a JSON document into the store
    Import {
        file: PathBuf,
        /// Merge into existing data instead of replacing it
        #[arg(long)]
        merge: bool,
    },
    /// Print the whole store as JSON
    Export,
    /// Manage aliases
    Alias {
        #[command(subcommand)]
        action: AliasAction,
    },
    /// Manage paths that require confirmation
    Confirm {
        #[command(subcommand)]
        action: ConfirmAction,
    },
}

#[derive(Subcommand)]
enum AliasAction {
    Set { name: String, target: String },
    Rm { name: String },
    Ls,
}

#[derive(Subcommand)]
enum ConfirmAction {
    Add { key: String },
    Rm { key: String },
    Ls,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dotstash=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = StashConfig::from_env()?;
    if let Some(home) = cli.home {
        let (max_depth, command_timeout) = (config.max_depth, config.command_timeout);
        config = StashConfig::in_dir(home);
        config.max_depth = max_depth;
        config.command_timeout = command_timeout;
    }

    let engine = StorageEngine::open(&config);
    tracing::debug!(
        "using {} backend in {}",
        engine.backend_kind(),
        config.home.display()
    );

    let result = run(cli.command, &engine, &config);
    engine.close();
    result
}

fn run(command: Command, engine: &StorageEngine, config: &StashConfig) -> anyhow::Result<()> {
    match command {
        Command::Get { key, raw } => {
            let canonical = engine.aliases().resolve(&key)?;
            let Some(found) = engine.get(&canonical)? else {
                bail!("'{}' not found", key);
            };
            let probe = PrefixProbe::default();
            let resolver = Resolver::from_config(engine, &ShellRunner, &probe, config);
            match found {
                Value::Leaf(text) if raw => println!("{text}"),
                Value::Leaf(text) => println!("{}", resolver.interpolate_key(&canonical, &text)?),
                Value::Branch(branch) => {
                    let shown = if raw {
                        branch
                    } else {
                        resolver.interpolate_subtree_at(&canonical, &branch)
                    };
                    println!("{}", serde_json::to_string_pretty(&shown)?);
                }
            }
        }
        Command::Set { key, value } => engine.set(&key, &value)?,
        Command::Rm { key } => {
            let canonical = engine.aliases().resolve(&key)?;
            if !engine.remove(&canonical)? {
                bail!("'{}' not found", key);
            }
        }
        Command::Mv { from, to } => {
            let canonical = engine.aliases().resolve(&from)?;
            if !engine.rename(&canonical, &to)? {
                bail!("'{}' not found", from);
            }
        }
        Command::Ls { prefix } => {
            for (key, leaf) in engine.flatten()? {
                let listed = prefix
                    .as_deref()
                    .is_none_or(|p| dotstash_core::path::is_self_or_descendant(&key, p));
                if listed {
                    println!("{key}: {leaf}");
                }
            }
        }
        Command::Search { needle } => {
            for (key, leaf) in engine.search(&needle)? {
                println!("{key}: {leaf}");
            }
        }
        Command::Import { file, merge } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let doc = value::parse_document(&text)
                .with_context(|| format!("cannot import {}", file.display()))?;
            let mode = if merge {
                ImportMode::Merge
            } else {
                ImportMode::Replace
            };
            engine.import(&doc, mode)?;
        }
        Command::Export => {
            println!("{}", serde_json::to_string_pretty(&engine.load_all()?)?);
        }
        Command::Alias { action } => match action {
            AliasAction::Set { name, target } => engine.aliases().set(&name, &target)?,
            AliasAction::Rm { name } => {
                if !engine.aliases().remove(&name)? {
                    bail!("no alias named '{}'", name);
                }
            }
            AliasAction::Ls => {
                for (name, target) in engine.aliases().list()? {
                    println!("{name} -> {target}");
                }
            }
        },
        Command::Confirm { action } => match action {
            ConfirmAction::Add { key } => engine.confirm().add(&key)?,
            ConfirmAction::Rm { key } => {
                engine.confirm().remove(&key)?;
            }
            ConfirmAction::Ls => {
                for key in engine.confirm().list()? {
                    println!("{key}");
                }
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dotstash_core::BackendKind;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (StorageEngine, StashConfig) {
        let config = StashConfig::in_dir(dir.path());
        let engine = StorageEngine::with_selector(&config, BackendKind::Json);
        (engine, config)
    }

    #[test]
    fn mv_follows_aliases_like_get_and_rm() {
        let dir = TempDir::new().unwrap();
        let (engine, config) = setup(&dir);
        engine.set("server.prod.ip", "10.0.0.1").unwrap();
        engine.aliases().set("prod", "server.prod").unwrap();

        let mv = Command::Mv {
            from: "prod".to_string(),
            to: "server.live".to_string(),
        };
        run(mv, &engine, &config).unwrap();

        assert_eq!(engine.get("server.live.ip").unwrap(), Some(Value::leaf("10.0.0.1")));
        assert_eq!(engine.get("server.prod").unwrap(), None);
        assert_eq!(engine.aliases().get("prod").unwrap(), None);
    }

    #[test]
    fn mv_of_unknown_path_fails() {
        let dir = TempDir::new().unwrap();
        let (engine, config) = setup(&dir);

        let mv = Command::Mv {
            from: "nothing".to_string(),
            to: "elsewhere".to_string(),
        };
        assert!(run(mv, &engine, &config).is_err());
    }
}
