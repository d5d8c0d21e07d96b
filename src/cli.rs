//! CLI parsing and command execution
//!
//! This module handles command-line argument parsing and routes commands to
//! the secret store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::backends::StaticBackendMap;
use crate::config::Config;
use crate::store::{NewSecret, SecretStore};

#[derive(Parser)]
#[command(name = "sst")]
#[command(about = "Secret storage client for HashiCorp Vault-style KV backends", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "SECRET_STORE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a sample configuration file
    Init {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "secret-store.toml")]
        output: PathBuf,
    },

    /// Read a secret
    Read {
        /// Logical key: service/project/deploy_group/name
        key: String,
    },

    /// Write or update a secret
    Write {
        /// Logical key: service/project/deploy_group/name
        key: String,

        /// Secret value to store
        value: String,

        /// Acting user, recorded as creator on first write and updater on
        /// every write
        #[arg(long)]
        actor: String,

        /// Mark the value as visible in caller UIs
        #[arg(long)]
        visible: bool,

        /// Free-form comment stored alongside the value
        #[arg(long)]
        comment: Option<String>,
    },

    /// Delete a secret
    Delete {
        /// Logical key: service/project/deploy_group/name
        key: String,
    },

    /// List every key across all configured backends
    Keys,

    /// Find keys whose stored value matches
    Find {
        /// Value to search for
        value: String,

        /// Keys to search; searches everything when omitted
        keys: Vec<String>,
    },
}

/// Execute the parsed command
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => {
            Config::create_sample(&output)?;
            info!("Sample configuration written to {}", output.display());
            Ok(())
        }
        command => {
            let config = load_config(cli.config.as_deref())?;
            let store = build_store(&config)?;
            run(store, command).await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Config::from_env()
            .context("No config file given and environment configuration incomplete"),
    }
}

fn build_store(config: &Config) -> Result<SecretStore> {
    anyhow::ensure!(
        !config.backends.is_empty(),
        "No secret backends configured"
    );
    let resolver = StaticBackendMap::from_config(config)?;
    Ok(SecretStore::new(
        Arc::new(resolver),
        config.fetch.parallel_reads,
    ))
}

async fn run(store: SecretStore, command: Commands) -> Result<()> {
    match command {
        Commands::Init { .. } => unreachable!("handled before the store is built"),

        Commands::Read { key } => {
            match store.get(&key).await? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => anyhow::bail!("Secret not found: {key}"),
            }
            Ok(())
        }

        Commands::Write {
            key,
            value,
            actor,
            visible,
            comment,
        } => {
            let secret = NewSecret {
                value,
                visible: visible.then_some(true),
                comment,
            };
            store
                .put(&key, secret, &actor)
                .await
                .with_context(|| format!("Failed to write {key}"))?;
            info!("Wrote secret {}", key);
            Ok(())
        }

        Commands::Delete { key } => {
            store
                .delete(&key)
                .await
                .with_context(|| format!("Failed to delete {key}"))?;
            info!("Deleted secret {}", key);
            Ok(())
        }

        Commands::Keys => {
            let mut keys: Vec<String> = store.list_all_keys().await.into_iter().collect();
            keys.sort();
            for key in keys {
                println!("{key}");
            }
            Ok(())
        }

        Commands::Find { value, keys } => {
            let keys = if keys.is_empty() {
                store.list_all_keys().await.into_iter().collect()
            } else {
                keys
            };
            for key in store.find_keys_by_value(keys, &value).await {
                println!("{key}");
            }
            Ok(())
        }
    }
}
