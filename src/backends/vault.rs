use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::secret_backend::{SecretBackend, SecretPayload, VALUE_FIELD};
use crate::error::{Result, SecretError};

/// Timeout applied to every backend request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HashiCorp Vault KV v2 client
#[derive(Clone)]
pub struct VaultClient {
    client: Client,
    address: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct VaultResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct VaultKvData {
    data: SecretPayload,
}

#[derive(Debug, Serialize)]
struct VaultWriteRequest {
    data: SecretPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<SecretPayload>,
}

impl VaultClient {
    /// Create a new Vault client
    pub fn new(address: String, token: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                SecretError::backend_unavailable(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            address,
            token,
        })
    }

    /// Read the secret payload at a path, `None` when nothing is stored there
    pub async fn read_secret(&self, mount: &str, path: &str) -> Result<Option<SecretPayload>> {
        let url = format!("{}/v1/{}/data/{}", self.address, mount, path);
        debug!("Reading secret from: {}", url);

        let response = self
            .client
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| {
                SecretError::backend_unavailable(format!("Failed to read secret: {e}"))
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response, "read").await?;

        let vault_response: VaultResponse<VaultKvData> = response.json().await.map_err(|e| {
            SecretError::backend_unavailable(format!("Failed to parse Vault response: {e}"))
        })?;

        Ok(Some(vault_response.data.data))
    }

    /// Write a secret payload to a path
    pub async fn write_secret(
        &self,
        mount: &str,
        path: &str,
        payload: SecretPayload,
    ) -> Result<()> {
        let url = format!("{}/v1/{}/data/{}", self.address, mount, path);
        debug!("Writing secret to: {}", url);

        let request_body = VaultWriteRequest {
            data: payload,
            options: None,
        };

        let response = self
            .client
            .post(&url)
            .header("X-Vault-Token", &self.token)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                SecretError::backend_unavailable(format!("Failed to write secret: {e}"))
            })?;

        ensure_success(response, "write").await?;

        info!("Successfully wrote secret to {}/{}", mount, path);
        Ok(())
    }

    /// Delete the secret at a path; deleting an absent path succeeds
    pub async fn delete_secret(&self, mount: &str, path: &str) -> Result<()> {
        let url = format!("{}/v1/{}/data/{}", self.address, mount, path);
        debug!("Deleting secret at: {}", url);

        let response = self
            .client
            .delete(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| {
                SecretError::backend_unavailable(format!("Failed to delete secret: {e}"))
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response, "delete").await?;

        info!("Successfully deleted secret at {}/{}", mount, path);
        Ok(())
    }

    /// List the entries directly under a path; folders carry a trailing `/`
    pub async fn list_keys(&self, mount: &str, path: &str) -> Result<Vec<String>> {
        let url = format!("{}/v1/{}/metadata/{}", self.address, mount, path);
        debug!("Listing secrets at: {}", url);

        let response = self
            .client
            .request(reqwest::Method::from_bytes(b"LIST").unwrap(), &url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| {
                SecretError::backend_unavailable(format!("Failed to list secrets: {e}"))
            })?;

        // 404 means no secrets exist at this path, which is fine
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(vec![]);
        }
        let response = ensure_success(response, "list").await?;

        #[derive(Deserialize)]
        struct ListData {
            keys: Vec<String>,
        }

        let vault_response: VaultResponse<ListData> = response.json().await.map_err(|e| {
            SecretError::backend_unavailable(format!("Failed to parse Vault list response: {e}"))
        })?;

        Ok(vault_response.data.keys)
    }
}

async fn ensure_success(response: reqwest::Response, operation: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SecretError::backend_unavailable(format!(
        "Vault {operation} failed with status {status}: {body}"
    )))
}

/// Wrapper for VaultClient that implements SecretBackend against one mount
pub struct VaultBackend {
    client: VaultClient,
    mount: String,
}

impl VaultBackend {
    pub fn new(client: VaultClient, mount: String) -> Self {
        Self { client, mount }
    }
}

#[async_trait::async_trait]
impl SecretBackend for VaultBackend {
    async fn read(&self, path: &str) -> Result<Option<SecretPayload>> {
        let payload = self.client.read_secret(&self.mount, path).await?;

        // A stored entry without the value field reads as absent.
        Ok(payload.filter(|p| p.get(VALUE_FIELD).is_some_and(|v| !v.is_null())))
    }

    async fn write(&self, path: &str, payload: SecretPayload) -> Result<()> {
        self.client.write_secret(&self.mount, path, payload).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.client.delete_secret(&self.mount, path).await
    }

    async fn list_recursive(&self, prefix: &str) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        let mut pending = vec![prefix.trim_matches('/').to_string()];

        while let Some(dir) = pending.pop() {
            for entry in self.client.list_keys(&self.mount, &dir).await? {
                let joined = if dir.is_empty() {
                    entry
                } else {
                    format!("{}/{}", dir, entry)
                };
                match joined.strip_suffix('/') {
                    Some(folder) => pending.push(folder.to_string()),
                    None => paths.push(joined),
                }
            }
        }

        Ok(paths)
    }

    fn backend_type(&self) -> &'static str {
        "HashiCorp Vault"
    }
}
