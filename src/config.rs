use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// One Vault-style backend serving one deploy group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub deploy_group: String,
    pub address: String,
    pub token: String,
    #[serde(default = "default_mount")]
    pub mount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Upper bound on concurrent reads in batched fetches. Size this to
    /// whatever scarce resource the calling context holds.
    #[serde(default = "default_parallel_reads")]
    pub parallel_reads: usize,
}

fn default_mount() -> String {
    "secret".to_string()
}

fn default_parallel_reads() -> usize {
    10
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            parallel_reads: default_parallel_reads(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        toml::from_str(&contents).context("Failed to parse config file")
    }

    /// Load a single-backend configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let backend = BackendConfig {
            deploy_group: std::env::var("VAULT_DEPLOY_GROUP")
                .unwrap_or_else(|_| "global".to_string()),
            address: std::env::var("VAULT_ADDR")
                .context("VAULT_ADDR environment variable not set")?,
            token: std::env::var("VAULT_TOKEN")
                .context("VAULT_TOKEN environment variable not set")?,
            mount: std::env::var("VAULT_MOUNT").unwrap_or_else(|_| default_mount()),
        };

        Ok(Self {
            backends: vec![backend],
            fetch: FetchConfig::default(),
        })
    }

    /// Create a sample configuration file
    pub fn create_sample<P: AsRef<Path>>(path: P) -> Result<()> {
        let sample = Self {
            backends: vec![
                BackendConfig {
                    deploy_group: "pod1".to_string(),
                    address: "http://127.0.0.1:8200".to_string(),
                    token: "your-vault-token-here".to_string(),
                    mount: default_mount(),
                },
                BackendConfig {
                    deploy_group: "pod2".to_string(),
                    address: "http://127.0.0.1:8201".to_string(),
                    token: "your-vault-token-here".to_string(),
                    mount: default_mount(),
                },
            ],
            fetch: FetchConfig::default(),
        };

        let toml_string =
            toml::to_string_pretty(&sample).context("Failed to serialize sample config")?;
        fs::write(path.as_ref(), toml_string)
            .with_context(|| format!("Failed to write sample config to {:?}", path.as_ref()))?;

        Ok(())
    }
}
