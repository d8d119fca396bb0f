// SPDX-License-Identifier: MIT OR Apache-2.0
//! The key-value backing contract consumed by the registry and code store
//! (spec §6: "Key-value backing (consumed)"), plus an in-process
//! implementation sufficient for tests and single-process deployments.
//!
//! Production deployments back onto an external KV engine; this crate
//! names the contract (`KvStore`) such an engine must satisfy, and never
//! grows the production engine itself — that collaborator is out of scope.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Failure modes for a [`KvStore`] operation.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// The backing store could not be reached or returned an unexpected error.
    #[error("kv backend unavailable: {0}")]
    Unavailable(String),
}

/// A single key entry as returned by [`KvStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    /// The full key name.
    pub name: String,
}

/// The narrow key-value contract the registry, code store, and credential
/// store are built on: `get`, `put`, `delete`, and prefix `list`.
///
/// Strong read-your-writes within a process is sufficient; no
/// transactionality is required (spec §4.9).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the value stored at `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Write `value` at `key`, replacing any existing value.
    async fn put(&self, key: &str, value: String) -> Result<(), KvError>;

    /// Remove any value stored at `key`. A no-op if absent.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// List every key beginning with `prefix`, in a deterministic (though
    /// not necessarily insertion) order.
    async fn list(&self, prefix: &str) -> Result<Vec<KeyEntry>, KvError>;
}

/// An in-memory [`KvStore`], backed by a [`tokio::sync::RwLock`]-guarded
/// [`BTreeMap`] for deterministic key ordering.
///
/// Suitable for tests and single-process deployments; it does not persist
/// across restarts (spec Non-goals: no cross-restart cache hydration).
#[derive(Debug, Default)]
pub struct InMemoryKv {
    data: RwLock<BTreeMap<String, String>>,
}

impl InMemoryKv {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<(), KvError> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KeyEntry>, KvError> {
        Ok(self
            .data
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| KeyEntry { name: k.clone() })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing_key_returns_none() {
        let kv = InMemoryKv::new();
        assert_eq!(kv.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let kv = InMemoryKv::new();
        kv.put("a", "1".to_string()).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn put_overwrites_existing_value() {
        let kv = InMemoryKv::new();
        kv.put("a", "1".to_string()).await.unwrap();
        kv.put("a", "2".to_string()).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let kv = InMemoryKv::new();
        kv.put("a", "1".to_string()).await.unwrap();
        kv.delete("a").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_missing_key_is_a_no_op() {
        let kv = InMemoryKv::new();
        assert!(kv.delete("absent").await.is_ok());
    }

    #[tokio::test]
    async fn list_returns_only_matching_prefix_in_sorted_order() {
        let kv = InMemoryKv::new();
        kv.put("code:f1", "a".to_string()).await.unwrap();
        kv.put("code:f1:v:1.0.0", "b".to_string()).await.unwrap();
        kv.put("code:f2", "c".to_string()).await.unwrap();
        kv.put("registry:f1", "d".to_string()).await.unwrap();

        let keys = kv.list("code:f1").await.unwrap();
        let names: Vec<_> = keys.into_iter().map(|k| k.name).collect();
        assert_eq!(names, vec!["code:f1", "code:f1:v:1.0.0"]);
    }

    #[tokio::test]
    async fn list_with_no_matches_is_empty() {
        let kv = InMemoryKv::new();
        kv.put("registry:f1", "x".to_string()).await.unwrap();
        assert!(kv.list("code:").await.unwrap().is_empty());
    }
}
