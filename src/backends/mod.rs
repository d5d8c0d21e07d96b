//! Secret backend implementations
//!
//! This module provides the backend abstraction, the Vault implementation,
//! and the deploy-group to backend mapping consumed by the store.

mod secret_backend;
mod vault;

pub use secret_backend::{SecretBackend, SecretPayload, VALUE_FIELD};
pub use vault::{VaultBackend, VaultClient};

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;

/// Type alias for a shared backend trait object
pub type Backend = Arc<dyn SecretBackend>;

/// Read-only view of the deploy-group to backend mapping. The mapping
/// itself is owned elsewhere; the store only ever looks backends up.
pub trait BackendResolver: Send + Sync {
    /// Backend serving a deploy group, if one is configured
    fn resolve(&self, deploy_group: &str) -> Option<Backend>;

    /// Every configured backend, for operations that aggregate across all
    fn all(&self) -> Vec<Backend>;
}

/// Resolver backed by a fixed in-memory mapping
pub struct StaticBackendMap {
    backends: HashMap<String, Backend>,
}

impl StaticBackendMap {
    pub fn new(backends: HashMap<String, Backend>) -> Self {
        Self { backends }
    }

    /// Build a Vault backend per configured deploy group
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut backends: HashMap<String, Backend> = HashMap::new();
        for entry in &config.backends {
            let client = VaultClient::new(entry.address.clone(), entry.token.clone())?;
            let backend = VaultBackend::new(client, entry.mount.clone());
            backends.insert(entry.deploy_group.clone(), Arc::new(backend));
        }
        Ok(Self::new(backends))
    }
}

impl BackendResolver for StaticBackendMap {
    fn resolve(&self, deploy_group: &str) -> Option<Backend> {
        self.backends.get(deploy_group).cloned()
    }

    fn all(&self) -> Vec<Backend> {
        self.backends.values().cloned().collect()
    }
}
