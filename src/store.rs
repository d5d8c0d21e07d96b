//! The secret store: the public API over one or more secret backends.
//!
//! Logical keys are encoded to backend paths and routed to the backend
//! serving their deploy group. Writes re-read the prior state first so
//! creator attribution survives updates and a failed write can be rolled
//! back.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::backends::{Backend, BackendResolver, SecretPayload, VALUE_FIELD};
use crate::error::{Result, SecretError};
use crate::fetcher;
use crate::keypath;

/// A decoded secret record as callers see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretRecord {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updater_id: Option<String>,
    /// Backend fields with no meaning at this layer, passed through as-is.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Caller-supplied fields for a write.
#[derive(Debug, Clone, Default)]
pub struct NewSecret {
    pub value: String,
    pub visible: Option<bool>,
    pub comment: Option<String>,
}

impl NewSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }
}

/// Client for reading, writing, listing and searching secrets across the
/// configured backends. Cheap to clone; holds no per-call state.
#[derive(Clone)]
pub struct SecretStore {
    resolver: Arc<dyn BackendResolver>,
    parallel_reads: usize,
}

impl SecretStore {
    pub fn new(resolver: Arc<dyn BackendResolver>, parallel_reads: usize) -> Self {
        Self {
            resolver,
            parallel_reads: parallel_reads.max(1),
        }
    }

    pub(crate) fn parallel_reads(&self) -> usize {
        self.parallel_reads
    }

    fn backend_for(&self, key: &str) -> Result<Backend> {
        let deploy_group = keypath::deploy_group_of(key)?;
        self.resolver
            .resolve(deploy_group)
            .ok_or_else(|| SecretError::no_backend(deploy_group))
    }

    /// Read the record stored under a logical key, `None` when absent.
    pub async fn get(&self, key: &str) -> Result<Option<SecretRecord>> {
        let backend = self.backend_for(key)?;
        let path = keypath::encode_path(key)?;

        let Some(payload) = backend.read(&path).await? else {
            return Ok(None);
        };
        Ok(decode_record(payload))
    }

    /// Read many keys concurrently. Keys that fail or resolve to nothing
    /// are omitted; the result is always a partial map, never an error.
    pub async fn get_many(&self, keys: Vec<String>) -> HashMap<String, SecretRecord> {
        fetcher::read_many(self, keys).await
    }

    /// Create or update the record under a logical key.
    ///
    /// The prior state is read first: an existing `creator_id` is kept so
    /// the original author stays attributed, and on a failed write the
    /// prior state is restored best-effort before the error propagates.
    /// There is no cross-call locking, so two concurrent writers to the
    /// same key race (last write wins, and a failed writer's revert can
    /// restore a state older than a concurrent commit).
    pub async fn put(&self, key: &str, secret: NewSecret, actor_id: &str) -> Result<()> {
        let backend = self.backend_for(key)?;
        let path = keypath::encode_path(key)?;

        let current = backend.read(&path).await?;
        let creator_id = current
            .as_ref()
            .and_then(|payload| payload.get("creator_id"))
            .and_then(Value::as_str)
            .unwrap_or(actor_id)
            .to_string();

        let payload = write_payload(&secret, &creator_id, actor_id);
        if let Err(err) = backend.write(&path, payload).await {
            revert(&backend, &path, current).await;
            return Err(err);
        }
        Ok(())
    }

    /// Delete the record under a logical key; deleting an absent key is
    /// not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let backend = self.backend_for(key)?;
        let path = keypath::encode_path(key)?;
        backend.delete(&path).await
    }

    /// Every logical key visible through any configured backend.
    pub async fn list_all_keys(&self) -> HashSet<String> {
        let mut keys = HashSet::new();
        for backend in self.resolver.all() {
            let paths = match backend.list_recursive("").await {
                Ok(paths) => paths,
                Err(err) => {
                    warn!(
                        "Skipping unreachable {} backend while listing keys: {}",
                        backend.backend_type(),
                        err
                    );
                    continue;
                }
            };
            for path in paths {
                // Backends can overlap, so dedup on the decoded key.
                match keypath::decode_path(&path) {
                    Ok(key) => {
                        keys.insert(key);
                    }
                    Err(err) => debug!("Ignoring undecodable path {}: {}", path, err),
                }
            }
        }
        keys
    }

    /// The subset of `keys` whose stored value equals `value`, compared in
    /// constant time so lookups do not leak match progress via timing.
    pub async fn find_keys_by_value(&self, keys: Vec<String>, value: &str) -> Vec<String> {
        let all = self.get_many(keys).await;
        let mut matching: Vec<String> = all
            .into_iter()
            .filter(|(_, record)| bool::from(record.value.as_bytes().ct_eq(value.as_bytes())))
            .map(|(key, _)| key)
            .collect();
        matching.sort();
        matching
    }
}

// Best-effort restoration of the state before a failed write. Errors in
// here are logged and dropped so the write failure stays the reported
// cause.
async fn revert(backend: &Backend, path: &str, current: Option<SecretPayload>) {
    let outcome = match current {
        Some(prior) => backend.write(path, prior).await,
        None => backend.delete(path).await,
    };
    if let Err(err) = outcome {
        warn!("Failed to revert {} after write error: {}", path, err);
    }
}

// The backend stores the value under VALUE_FIELD; lift it out under its
// caller-facing name and keep unknown fields intact.
fn decode_record(mut payload: SecretPayload) -> Option<SecretRecord> {
    let value = match payload.remove(VALUE_FIELD)? {
        Value::String(value) => value,
        Value::Null => return None,
        other => other.to_string(),
    };
    let visible = payload.remove("visible").and_then(|v| v.as_bool());
    let comment = take_string(&mut payload, "comment");
    let creator_id = take_string(&mut payload, "creator_id");
    let updater_id = take_string(&mut payload, "updater_id");

    Some(SecretRecord {
        value,
        visible,
        comment,
        creator_id,
        updater_id,
        extra: payload,
    })
}

fn take_string(payload: &mut SecretPayload, field: &str) -> Option<String> {
    match payload.remove(field)? {
        Value::String(s) => Some(s),
        other => {
            // Not ours to interpret; leave it in the passthrough set.
            payload.insert(field.to_string(), other);
            None
        }
    }
}

fn write_payload(secret: &NewSecret, creator_id: &str, updater_id: &str) -> SecretPayload {
    let mut payload = SecretPayload::new();
    payload.insert(
        VALUE_FIELD.to_string(),
        Value::String(secret.value.clone()),
    );
    if let Some(visible) = secret.visible {
        payload.insert("visible".to_string(), Value::Bool(visible));
    }
    if let Some(comment) = &secret.comment {
        payload.insert("comment".to_string(), Value::String(comment.clone()));
    }
    payload.insert(
        "creator_id".to_string(),
        Value::String(creator_id.to_string()),
    );
    payload.insert(
        "updater_id".to_string(),
        Value::String(updater_id.to_string()),
    );
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{SecretBackend, StaticBackendMap};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    struct WriteGate {
        value: String,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    /// In-memory backend with failure injection. Injected write failures
    /// still land in the map first, like a partial write on the wire.
    #[derive(Default)]
    struct MockBackend {
        data: Mutex<HashMap<String, SecretPayload>>,
        fail_next_write: AtomicBool,
        unreachable: AtomicBool,
        write_gate: Mutex<Option<WriteGate>>,
    }

    impl MockBackend {
        fn seed(&self, path: &str, payload: SecretPayload) {
            self.data.lock().unwrap().insert(path.to_string(), payload);
        }

        fn fail_next_write(&self) {
            self.fail_next_write.store(true, Ordering::SeqCst);
        }

        fn set_unreachable(&self) {
            self.unreachable.store(true, Ordering::SeqCst);
        }

        fn gate_writes_of(&self, value: &str, entered: Arc<Notify>, release: Arc<Notify>) {
            *self.write_gate.lock().unwrap() = Some(WriteGate {
                value: value.to_string(),
                entered,
                release,
            });
        }

        fn stored_value(&self, path: &str) -> Option<Value> {
            self.data
                .lock()
                .unwrap()
                .get(path)
                .and_then(|p| p.get(VALUE_FIELD))
                .cloned()
        }
    }

    #[async_trait::async_trait]
    impl SecretBackend for MockBackend {
        async fn read(&self, path: &str) -> Result<Option<SecretPayload>> {
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(SecretError::backend_unavailable("injected outage"));
            }
            Ok(self.data.lock().unwrap().get(path).cloned())
        }

        async fn write(&self, path: &str, payload: SecretPayload) -> Result<()> {
            let gate = {
                let guard = self.write_gate.lock().unwrap();
                guard.as_ref().and_then(|g| {
                    (payload.get(VALUE_FIELD) == Some(&Value::String(g.value.clone())))
                        .then(|| (Arc::clone(&g.entered), Arc::clone(&g.release)))
                })
            };
            if let Some((entered, release)) = gate {
                entered.notify_one();
                release.notified().await;
                return Err(SecretError::backend_unavailable("injected write failure"));
            }

            if self.unreachable.load(Ordering::SeqCst) {
                return Err(SecretError::backend_unavailable("injected outage"));
            }
            self.data.lock().unwrap().insert(path.to_string(), payload);
            if self.fail_next_write.swap(false, Ordering::SeqCst) {
                return Err(SecretError::backend_unavailable("injected write failure"));
            }
            Ok(())
        }

        async fn delete(&self, path: &str) -> Result<()> {
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(SecretError::backend_unavailable("injected outage"));
            }
            self.data.lock().unwrap().remove(path);
            Ok(())
        }

        async fn list_recursive(&self, _prefix: &str) -> Result<Vec<String>> {
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(SecretError::backend_unavailable("injected outage"));
            }
            let mut paths: Vec<String> = self.data.lock().unwrap().keys().cloned().collect();
            paths.sort();
            Ok(paths)
        }

        fn backend_type(&self) -> &'static str {
            "mock"
        }
    }

    fn store_with(backends: &[(&str, Arc<MockBackend>)]) -> SecretStore {
        let map = backends
            .iter()
            .map(|(group, backend)| (group.to_string(), Arc::clone(backend) as Backend))
            .collect();
        SecretStore::new(Arc::new(StaticBackendMap::new(map)), 4)
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let backend = Arc::new(MockBackend::default());
        let store = store_with(&[("pod1", Arc::clone(&backend))]);

        let secret = NewSecret {
            value: "hunter2".to_string(),
            visible: Some(true),
            comment: Some("db credentials".to_string()),
        };
        store
            .put("svc/proj/pod1/db_password", secret, "alice")
            .await
            .unwrap();

        let record = store
            .get("svc/proj/pod1/db_password")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.value, "hunter2");
        assert_eq!(record.visible, Some(true));
        assert_eq!(record.comment.as_deref(), Some("db credentials"));
        assert_eq!(record.creator_id.as_deref(), Some("alice"));
        assert_eq!(record.updater_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_get_absent_key() {
        let backend = Arc::new(MockBackend::default());
        let store = store_with(&[("pod1", Arc::clone(&backend))]);

        assert!(store
            .get("svc/proj/pod1/missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_get_without_backend_is_an_error() {
        let store = store_with(&[]);

        let err = store.get("svc/proj/pod1/db_password").await.unwrap_err();
        assert!(matches!(err, SecretError::NoBackend { .. }));
    }

    #[tokio::test]
    async fn test_get_invalid_key_is_an_error() {
        let backend = Arc::new(MockBackend::default());
        let store = store_with(&[("pod1", Arc::clone(&backend))]);

        let err = store.get("svc/proj").await.unwrap_err();
        assert!(matches!(err, SecretError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn test_key_name_separators_survive_storage() {
        let backend = Arc::new(MockBackend::default());
        let store = store_with(&[("pod1", Arc::clone(&backend))]);

        store
            .put(
                "svc/proj/pod1/certs/tls.key",
                NewSecret::new("pem"),
                "alice",
            )
            .await
            .unwrap();

        // Stored under the escaped path, readable under the logical key.
        assert!(backend
            .stored_value("svc/proj/pod1/certs%2Ftls.key")
            .is_some());
        let record = store
            .get("svc/proj/pod1/certs/tls.key")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.value, "pem");
    }

    #[tokio::test]
    async fn test_put_preserves_creator_across_updates() {
        let backend = Arc::new(MockBackend::default());
        let store = store_with(&[("pod1", Arc::clone(&backend))]);
        let key = "svc/proj/pod1/db_password";

        store.put(key, NewSecret::new("v1"), "alice").await.unwrap();
        store.put(key, NewSecret::new("v2"), "bob").await.unwrap();

        let record = store.get(key).await.unwrap().unwrap();
        assert_eq!(record.value, "v2");
        assert_eq!(record.creator_id.as_deref(), Some("alice"));
        assert_eq!(record.updater_id.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_failed_put_reverts_to_prior_record() {
        let backend = Arc::new(MockBackend::default());
        let store = store_with(&[("pod1", Arc::clone(&backend))]);
        let key = "svc/proj/pod1/db_password";

        store.put(key, NewSecret::new("v1"), "alice").await.unwrap();

        backend.fail_next_write();
        let err = store.put(key, NewSecret::new("v2"), "bob").await;
        assert!(err.is_err());

        let record = store.get(key).await.unwrap().unwrap();
        assert_eq!(record.value, "v1");
        assert_eq!(record.creator_id.as_deref(), Some("alice"));
        assert_eq!(record.updater_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_failed_put_without_prior_deletes_partial_write() {
        let backend = Arc::new(MockBackend::default());
        let store = store_with(&[("pod1", Arc::clone(&backend))]);
        let key = "svc/proj/pod1/db_password";

        backend.fail_next_write();
        assert!(store.put(key, NewSecret::new("v1"), "alice").await.is_err());

        assert!(store.get(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_many_tolerates_unconfigured_deploy_group() {
        let backend = Arc::new(MockBackend::default());
        let store = store_with(&[("pod1", Arc::clone(&backend))]);

        store
            .put("svc/proj/pod1/a", NewSecret::new("va"), "alice")
            .await
            .unwrap();

        let found = store
            .get_many(vec![
                "svc/proj/pod1/a".to_string(),
                "svc/proj/pod2/b".to_string(),
            ])
            .await;

        assert_eq!(found.len(), 1);
        assert_eq!(found["svc/proj/pod1/a"].value, "va");
    }

    #[tokio::test]
    async fn test_get_many_tolerates_unreachable_backend() {
        let backend_a = Arc::new(MockBackend::default());
        let backend_b = Arc::new(MockBackend::default());
        let store = store_with(&[
            ("pod1", Arc::clone(&backend_a)),
            ("pod2", Arc::clone(&backend_b)),
        ]);

        store
            .put("svc/proj/pod1/a", NewSecret::new("va"), "alice")
            .await
            .unwrap();
        backend_b.set_unreachable();

        let found = store
            .get_many(vec![
                "svc/proj/pod1/a".to_string(),
                "svc/proj/pod2/b".to_string(),
            ])
            .await;

        assert_eq!(found.len(), 1);
        assert!(found.contains_key("svc/proj/pod1/a"));
    }

    #[tokio::test]
    async fn test_list_all_keys_dedups_across_overlapping_backends() {
        let backend_a = Arc::new(MockBackend::default());
        let backend_b = Arc::new(MockBackend::default());
        let shared = SecretPayload::from([("vault".to_string(), json!("x"))]);
        backend_a.seed("svc/proj/env/shared", shared.clone());
        backend_a.seed("svc/proj/env/only_a", shared.clone());
        backend_b.seed("svc/proj/env/shared", shared.clone());
        backend_b.seed("svc/proj/env/certs%2Ftls.key", shared);

        let store = store_with(&[
            ("pod1", Arc::clone(&backend_a)),
            ("pod2", Arc::clone(&backend_b)),
        ]);

        let keys = store.list_all_keys().await;
        let expected: HashSet<String> = [
            "svc/proj/env/shared",
            "svc/proj/env/only_a",
            "svc/proj/env/certs/tls.key",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn test_list_all_keys_skips_unreachable_backend() {
        let backend_a = Arc::new(MockBackend::default());
        let backend_b = Arc::new(MockBackend::default());
        backend_a.seed(
            "svc/proj/env/up",
            SecretPayload::from([("vault".to_string(), json!("x"))]),
        );
        backend_b.set_unreachable();

        let store = store_with(&[
            ("pod1", Arc::clone(&backend_a)),
            ("pod2", Arc::clone(&backend_b)),
        ]);

        let keys = store.list_all_keys().await;
        assert_eq!(keys.len(), 1);
        assert!(keys.contains("svc/proj/env/up"));
    }

    #[tokio::test]
    async fn test_find_keys_by_value() {
        let backend = Arc::new(MockBackend::default());
        let store = store_with(&[("pod1", Arc::clone(&backend))]);

        store
            .put("svc/proj/pod1/k1", NewSecret::new("secret-x"), "alice")
            .await
            .unwrap();
        store
            .put("svc/proj/pod1/k2", NewSecret::new("other"), "alice")
            .await
            .unwrap();
        store
            .put("svc/proj/pod1/k3", NewSecret::new("secret-x"), "alice")
            .await
            .unwrap();

        let matching = store
            .find_keys_by_value(
                vec![
                    "svc/proj/pod1/k1".to_string(),
                    "svc/proj/pod1/k2".to_string(),
                    "svc/proj/pod1/k3".to_string(),
                ],
                "secret-x",
            )
            .await;

        assert_eq!(
            matching,
            vec!["svc/proj/pod1/k1".to_string(), "svc/proj/pod1/k3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let backend = Arc::new(MockBackend::default());
        let store = store_with(&[("pod1", Arc::clone(&backend))]);
        let key = "svc/proj/pod1/db_password";

        store.put(key, NewSecret::new("v1"), "alice").await.unwrap();
        store.delete(key).await.unwrap();
        assert!(store.get(key).await.unwrap().is_none());

        // Deleting again is not an error.
        store.delete(key).await.unwrap();
    }

    #[tokio::test]
    async fn test_extra_backend_fields_pass_through() {
        let backend = Arc::new(MockBackend::default());
        backend.seed(
            "svc/proj/pod1/leased",
            SecretPayload::from([
                ("vault".to_string(), json!("v")),
                ("lease_duration".to_string(), json!(3600)),
            ]),
        );
        let store = store_with(&[("pod1", Arc::clone(&backend))]);

        let record = store.get("svc/proj/pod1/leased").await.unwrap().unwrap();
        assert_eq!(record.value, "v");
        assert_eq!(record.extra.get("lease_duration"), Some(&json!(3600)));
    }

    // Known, accepted race: put takes no cross-call lock, so a failed
    // writer reverts to the snapshot it read even when another writer
    // committed in between.
    #[tokio::test]
    async fn test_failed_put_revert_can_clobber_concurrent_write() {
        let backend = Arc::new(MockBackend::default());
        let store = store_with(&[("pod1", Arc::clone(&backend))]);
        let key = "svc/proj/pod1/db_password";

        store.put(key, NewSecret::new("v0"), "alice").await.unwrap();

        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        backend.gate_writes_of("v1", Arc::clone(&entered), Arc::clone(&release));

        let racing = {
            let store = store.clone();
            tokio::spawn(async move { store.put(key, NewSecret::new("v1"), "bob").await })
        };
        // Wait until the racing writer has read the v0 snapshot and
        // entered its write.
        entered.notified().await;

        store.put(key, NewSecret::new("v2"), "carol").await.unwrap();

        release.notify_one();
        assert!(racing.await.unwrap().is_err());

        // The failed writer's revert restored its stale snapshot, erasing
        // the newer commit.
        let record = store.get(key).await.unwrap().unwrap();
        assert_eq!(record.value, "v0");
    }
}
