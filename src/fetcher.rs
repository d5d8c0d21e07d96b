//! Bounded concurrent fan-out for batched secret reads.
//!
//! Each key is fetched on its own task, gated by a semaphore sized from
//! configuration.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::store::{SecretRecord, SecretStore};

/// Read every key concurrently and collect whatever resolves. Keys whose
/// read fails or comes back empty are omitted, so callers always get a
/// partial map rather than an all-or-nothing failure.
pub async fn read_many(store: &SecretStore, keys: Vec<String>) -> HashMap<String, SecretRecord> {
    let semaphore = Arc::new(Semaphore::new(store.parallel_reads()));
    let mut tasks = JoinSet::new();

    for key in keys {
        let semaphore = Arc::clone(&semaphore);
        let store = store.clone();
        tasks.spawn(async move {
            // The semaphore is never closed, so acquisition only ever succeeds.
            let _permit = semaphore.acquire_owned().await.ok();
            let result = store.get(&key).await;
            (key, result)
        });
    }

    let mut found = HashMap::new();
    while let Some(joined) = tasks.join_next().await {
        let Ok((key, result)) = joined else { continue };
        match result {
            Ok(Some(record)) => {
                found.insert(key, record);
            }
            Ok(None) => {}
            // deploy group has no backend, or the backend is unreachable
            Err(err) => debug!("Skipping {} in batched read: {}", key, err),
        }
    }

    found
}
