use std::collections::HashMap;

use serde_json::Value;

use crate::error::Result;

/// Wire payload stored at a backend path. The secret value lives under
/// [`VALUE_FIELD`]; any other entries are passed through untouched.
pub type SecretPayload = HashMap<String, Value>;

/// Field name the secret value is stored under on the backend.
pub const VALUE_FIELD: &str = "vault";

/// Trait for secret storage backends (Vault KV and compatible stores)
#[async_trait::async_trait]
pub trait SecretBackend: Send + Sync {
    /// Read the payload stored at a path. Returns `None` when nothing is
    /// stored there or the stored payload carries no value field.
    async fn read(&self, path: &str) -> Result<Option<SecretPayload>>;

    /// Write a payload to a path, replacing whatever was there.
    async fn write(&self, path: &str, payload: SecretPayload) -> Result<()>;

    /// Delete the payload at a path. Deleting an absent path is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// List every leaf path below a prefix, relative to the backend root.
    async fn list_recursive(&self, prefix: &str) -> Result<Vec<String>>;

    /// Get the backend type name for display purposes
    fn backend_type(&self) -> &'static str;
}
