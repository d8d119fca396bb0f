// SPDX-License-Identifier: MIT OR Apache-2.0
//! Versioned function metadata storage (spec §4.3).
//!
//! The registry exclusively owns [`FunctionMetadata`]. Key layout over the
//! backing [`KvStore`]:
//!
//! - `registry:<id>` — the latest metadata for `id`.
//! - `registry:<id>:v:<version>` — immutable per-version metadata.
//!
//! The function id grammar forbids `:`, so these two key shapes never
//! collide and prefix iteration over `registry:` cleanly separates "latest"
//! entries from versioned ones.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::Utc;
use fg_core::{FunctionId, FunctionMetadata, ValidationError, Version};
use fg_kv::KvStore;
use std::sync::Arc;
use tokio::sync::Mutex;

const PREFIX: &str = "registry:";

/// Failure modes for a registry operation.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The metadata failed a §3 invariant; the write was aborted.
    #[error("{0}")]
    Validation(#[from] ValidationError),
    /// `putVersion` targeted an `(id, version)` that already holds different metadata.
    #[error("version already exists")]
    VersionExists,
    /// `rollback` targeted a version with no stored metadata.
    #[error("version not found")]
    VersionNotFound,
}

fn latest_key(id: &FunctionId) -> String {
    format!("{PREFIX}{id}")
}

fn version_key(id: &FunctionId, version: &Version) -> String {
    format!("{PREFIX}{id}:v:{version}")
}

fn version_prefix(id: &FunctionId) -> String {
    format!("{PREFIX}{id}:v:")
}

fn encode(metadata: &FunctionMetadata) -> String {
    serde_json::to_string(metadata).expect("FunctionMetadata always serializes")
}

fn decode(raw: &str) -> FunctionMetadata {
    serde_json::from_str(raw).expect("registry values are always well-formed FunctionMetadata")
}

/// Versioned metadata storage, backed by a [`KvStore`].
pub struct Registry<K: KvStore> {
    kv: Arc<K>,
    // `KvStore` exposes no compare-and-set primitive (spec §6), so the
    // "first committer wins" guarantee for `put_version` is enforced here:
    // the existence check and the write must happen as one critical section.
    version_lock: Mutex<()>,
}

impl<K: KvStore> Registry<K> {
    /// Construct a registry fronting `kv`.
    #[must_use]
    pub fn new(kv: Arc<K>) -> Self {
        Self {
            kv,
            version_lock: Mutex::new(()),
        }
    }

    /// Upsert the latest metadata for `metadata.id`.
    ///
    /// `updated_at` is stamped to now; `created_at` is preserved from any
    /// existing latest record, or stamped to now if this is the first write.
    /// Validation failures abort the write — no partial state is visible.
    pub async fn put(&self, mut metadata: FunctionMetadata) -> Result<FunctionMetadata, RegistryError> {
        metadata.validate()?;

        let now = Utc::now();
        let existing_created_at = self
            .get(&metadata.id)
            .await
            .and_then(|existing| existing.created_at);
        metadata.created_at = Some(existing_created_at.unwrap_or(now));
        metadata.updated_at = Some(now);

        self.kv
            .put(&latest_key(&metadata.id), encode(&metadata))
            .await
            .map_err(|e| RegistryError::Validation(ValidationError::new("kv", e.to_string())))?;
        Ok(metadata)
    }

    /// Immutably write metadata at `(id, version)`.
    ///
    /// A second write to the same `(id, version)` with different bytes
    /// fails with [`RegistryError::VersionExists`]; an identical re-write is
    /// idempotent (spec §4.8: "Redeploying `(id, version)` with identical
    /// bytes is idempotent").
    pub async fn put_version(
        &self,
        id: &FunctionId,
        version: &Version,
        metadata: FunctionMetadata,
    ) -> Result<(), RegistryError> {
        metadata.validate()?;

        let key = version_key(id, version);
        let encoded = encode(&metadata);

        let _guard = self.version_lock.lock().await;
        if let Some(existing) = self.kv.get(&key).await.unwrap_or(None) {
            if existing == encoded {
                return Ok(());
            }
            return Err(RegistryError::VersionExists);
        }

        self.kv
            .put(&key, encoded)
            .await
            .map_err(|e| RegistryError::Validation(ValidationError::new("kv", e.to_string())))?;
        Ok(())
    }

    /// Fetch the latest metadata for `id`, if any.
    pub async fn get(&self, id: &FunctionId) -> Option<FunctionMetadata> {
        self.kv
            .get(&latest_key(id))
            .await
            .ok()
            .flatten()
            .map(|raw| decode(&raw))
    }

    /// Fetch the metadata stored at `(id, version)`, if any.
    pub async fn get_version(&self, id: &FunctionId, version: &Version) -> Option<FunctionMetadata> {
        self.kv
            .get(&version_key(id, version))
            .await
            .ok()
            .flatten()
            .map(|raw| decode(&raw))
    }

    /// List every version written for `id`, in key (lexicographic) order.
    pub async fn list_versions(&self, id: &FunctionId) -> Vec<String> {
        let prefix = version_prefix(id);
        self.kv
            .list(&prefix)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|entry| entry.name[prefix.len()..].to_string())
            .collect()
    }

    /// List the current (latest) metadata across every deployed id.
    pub async fn list(&self) -> Vec<FunctionMetadata> {
        let keys = self.kv.list(PREFIX).await.unwrap_or_default();
        let mut out = Vec::with_capacity(keys.len());
        for entry in keys {
            if entry.name[PREFIX.len()..].contains(":v:") {
                continue;
            }
            if let Ok(Some(raw)) = self.kv.get(&entry.name).await {
                out.push(decode(&raw));
            }
        }
        out
    }

    /// Remove the latest pointer and every version record for `id`.
    ///
    /// Does not touch the code store; callers implementing the full
    /// `DELETE /api/functions/<id>` semantics of spec §4.3 must also call
    /// the code store's `deleteAll` (kept separate so each store owns only
    /// its own keys — see `DESIGN.md`).
    pub async fn delete(&self, id: &FunctionId) {
        let _ = self.kv.delete(&latest_key(id)).await;
        let prefix = version_prefix(id);
        if let Ok(versions) = self.kv.list(&prefix).await {
            for entry in versions {
                let _ = self.kv.delete(&entry.name).await;
            }
        }
    }

    /// Copy the metadata at `(id, to_version)` onto the latest slot.
    pub async fn rollback(&self, id: &FunctionId, to_version: &Version) -> Result<FunctionMetadata, RegistryError> {
        let target = self
            .get_version(id, to_version)
            .await
            .ok_or(RegistryError::VersionNotFound)?;
        let mut restored = target;
        restored.updated_at = Some(Utc::now());
        self.kv
            .put(&latest_key(id), encode(&restored))
            .await
            .map_err(|e| RegistryError::Validation(ValidationError::new("kv", e.to_string())))?;
        Ok(restored)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use fg_core::Language;
    use fg_kv::InMemoryKv;
    use std::collections::BTreeMap;

    fn sample(id: &str, version: &str) -> FunctionMetadata {
        FunctionMetadata {
            id: FunctionId::parse(id).unwrap(),
            version: Version::parse(version).unwrap(),
            language: Language::Javascript,
            entry_point: "index.js".to_string(),
            dependencies: BTreeMap::new(),
            created_at: None,
            updated_at: None,
            description: None,
            author: None,
        }
    }

    fn registry() -> Registry<InMemoryKv> {
        Registry::new(Arc::new(InMemoryKv::new()))
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let reg = registry();
        reg.put(sample("f1", "1.0.0")).await.unwrap();
        let got = reg.get(&FunctionId::parse("f1").unwrap()).await.unwrap();
        assert_eq!(got.version.as_str(), "1.0.0");
        assert!(got.created_at.is_some());
        assert!(got.updated_at.is_some());
    }

    #[tokio::test]
    async fn put_preserves_created_at_across_updates() {
        let reg = registry();
        let first = reg.put(sample("f1", "1.0.0")).await.unwrap();
        let second = reg.put(sample("f1", "1.1.0")).await.unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_ne!(first.version.as_str(), second.version.as_str());
    }

    #[tokio::test]
    async fn put_version_is_immutable_on_conflicting_write() {
        let reg = registry();
        let id = FunctionId::parse("f1").unwrap();
        let version = Version::parse("1.0.0").unwrap();
        reg.put_version(&id, &version, sample("f1", "1.0.0"))
            .await
            .unwrap();

        let mut different = sample("f1", "1.0.0");
        different.description = Some("changed".to_string());
        let err = reg.put_version(&id, &version, different).await.unwrap_err();
        assert!(matches!(err, RegistryError::VersionExists));
    }

    #[tokio::test]
    async fn put_version_identical_rewrite_is_idempotent() {
        let reg = registry();
        let id = FunctionId::parse("f1").unwrap();
        let version = Version::parse("1.0.0").unwrap();
        reg.put_version(&id, &version, sample("f1", "1.0.0"))
            .await
            .unwrap();
        assert!(reg
            .put_version(&id, &version, sample("f1", "1.0.0"))
            .await
            .is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_put_version_of_same_key_yields_exactly_one_conflict() {
        let reg = Arc::new(registry());
        let id = FunctionId::parse("f1").unwrap();
        let version = Version::parse("1.0.0").unwrap();

        let mut first = sample("f1", "1.0.0");
        first.description = Some("first".to_string());
        let mut second = sample("f1", "1.0.0");
        second.description = Some("second".to_string());

        let reg_a = reg.clone();
        let (id_a, version_a) = (id.clone(), version.clone());
        let task_a = tokio::spawn(async move { reg_a.put_version(&id_a, &version_a, first).await });
        let reg_b = reg.clone();
        let (id_b, version_b) = (id.clone(), version.clone());
        let task_b = tokio::spawn(async move { reg_b.put_version(&id_b, &version_b, second).await });

        let (result_a, result_b) = tokio::join!(task_a, task_b);
        let results = [result_a.unwrap(), result_b.unwrap()];
        let ok_count = results.iter().filter(|r| r.is_ok()).count();
        let conflict_count = results
            .iter()
            .filter(|r| matches!(r, Err(RegistryError::VersionExists)))
            .count();
        assert_eq!(ok_count, 1, "exactly one writer should commit");
        assert_eq!(conflict_count, 1, "the loser should observe VersionExists");
    }

    #[tokio::test]
    async fn get_version_returns_none_when_absent() {
        let reg = registry();
        let id = FunctionId::parse("f1").unwrap();
        let version = Version::parse("1.0.0").unwrap();
        assert!(reg.get_version(&id, &version).await.is_none());
    }

    #[tokio::test]
    async fn list_versions_returns_every_written_version() {
        let reg = registry();
        let id = FunctionId::parse("f1").unwrap();
        for v in ["1.0.0", "1.1.0", "2.0.0"] {
            reg.put_version(&id, &Version::parse(v).unwrap(), sample("f1", v))
                .await
                .unwrap();
        }
        let versions = reg.list_versions(&id).await;
        assert_eq!(versions, vec!["1.0.0", "1.1.0", "2.0.0"]);
    }

    #[tokio::test]
    async fn delete_removes_latest_and_all_versions() {
        let reg = registry();
        let id = FunctionId::parse("f1").unwrap();
        reg.put(sample("f1", "1.0.0")).await.unwrap();
        reg.put_version(&id, &Version::parse("1.0.0").unwrap(), sample("f1", "1.0.0"))
            .await
            .unwrap();

        reg.delete(&id).await;

        assert!(reg.get(&id).await.is_none());
        assert!(reg.list_versions(&id).await.is_empty());
    }

    #[tokio::test]
    async fn rollback_restores_older_version_as_latest() {
        let reg = registry();
        let id = FunctionId::parse("f1").unwrap();
        let v1 = Version::parse("1.0.0").unwrap();
        reg.put_version(&id, &v1, sample("f1", "1.0.0")).await.unwrap();
        reg.put(sample("f1", "2.0.0")).await.unwrap();

        let rolled_back = reg.rollback(&id, &v1).await.unwrap();
        assert_eq!(rolled_back.version.as_str(), "1.0.0");
        assert_eq!(reg.get(&id).await.unwrap().version.as_str(), "1.0.0");
    }

    #[tokio::test]
    async fn list_returns_latest_across_ids_only() {
        let reg = registry();
        reg.put(sample("f1", "1.0.0")).await.unwrap();
        reg.put(sample("f2", "2.0.0")).await.unwrap();
        reg.put_version(
            &FunctionId::parse("f1").unwrap(),
            &Version::parse("1.0.0").unwrap(),
            sample("f1", "1.0.0"),
        )
        .await
        .unwrap();

        let mut ids: Vec<_> = reg.list().await.into_iter().map(|m| m.id.to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["f1".to_string(), "f2".to_string()]);
    }

    #[tokio::test]
    async fn rollback_to_missing_version_fails() {
        let reg = registry();
        let id = FunctionId::parse("f1").unwrap();
        let err = reg
            .rollback(&id, &Version::parse("9.9.9").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::VersionNotFound));
    }

    #[tokio::test]
    async fn validation_error_aborts_the_write() {
        let reg = registry();
        let mut bad = sample("f1", "1.0.0");
        bad.entry_point = "/etc/passwd".to_string();
        assert!(reg.put(bad).await.is_err());
        assert!(reg.get(&FunctionId::parse("f1").unwrap()).await.is_none());
    }
}
