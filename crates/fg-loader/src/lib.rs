// SPDX-License-Identifier: MIT OR Apache-2.0
//! A bounded, single-flight cache fronting the registry and code store
//! (spec §4.6).
//!
//! Concurrent [`Loader::load`] calls for the same `(id, version)` coalesce
//! onto one in-flight fetch via a per-key [`tokio::sync::OnceCell`], so a
//! cold cache under concurrent load does not thunder the backing store.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use fg_codestore::CodeStore;
use fg_core::{CodeArtifact, FunctionId, FunctionMetadata, Version};
use fg_kv::KvStore;
use fg_registry::Registry;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};

/// Why a [`Loader::load`] call failed outright.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoaderError {
    /// Neither the requested metadata nor code artifact could be found.
    #[error("function not found")]
    NotFound,
}

/// A function bound into an executable shape: metadata plus its resolved
/// code artifact, ready to hand to a sandbox factory.
#[derive(Debug, Clone)]
pub struct LoadedFunction {
    /// The resolved metadata.
    pub metadata: FunctionMetadata,
    /// The resolved code (compiled artifact if present, else retained source).
    pub code: CodeArtifact,
}

/// The outcome of a [`Loader::load`] call.
#[derive(Debug, Clone)]
pub struct LoadResult {
    /// The loaded function.
    pub handle: Arc<LoadedFunction>,
    /// `true` if served from the in-memory cache without touching the backing store.
    pub from_cache: bool,
    /// Wall-clock time spent in this call, in milliseconds.
    pub load_time_ms: u64,
    /// `true` if the resolved code fell back to retained source when the
    /// function's language expected a precompiled artifact.
    pub degraded: bool,
    /// Why `degraded` is set, when it is.
    pub degradation_reason: Option<String>,
}

#[derive(Clone)]
struct CacheEntry {
    handle: Arc<LoadedFunction>,
    degraded: bool,
    degradation_reason: Option<String>,
}

fn cache_key(id: &FunctionId, version: Option<&Version>) -> String {
    match version {
        Some(v) => format!("{id}@{v}"),
        None => format!("{id}@latest"),
    }
}

/// The default bounded cache size when none is specified.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// A cache fronting a [`Registry`] and [`CodeStore`], coalescing concurrent
/// loads of the same key.
pub struct Loader<K: KvStore> {
    registry: Arc<Registry<K>>,
    codestore: Arc<CodeStore<K>>,
    cache: Mutex<LruCache<String, CacheEntry>>,
    inflight: Mutex<HashMap<String, Arc<OnceCell<Result<CacheEntry, LoaderError>>>>>,
}

impl<K: KvStore> Loader<K> {
    /// Construct a loader with the default bounded capacity.
    #[must_use]
    pub fn new(registry: Arc<Registry<K>>, codestore: Arc<CodeStore<K>>) -> Self {
        Self::with_capacity(registry, codestore, DEFAULT_CACHE_CAPACITY)
    }

    /// Construct a loader whose cache holds at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(registry: Arc<Registry<K>>, codestore: Arc<CodeStore<K>>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).expect("loader cache capacity must be nonzero");
        Self {
            registry,
            codestore,
            cache: Mutex::new(LruCache::new(capacity)),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `id` (at `version`, or the latest if `None`) into an
    /// execution handle, consulting the cache first and coalescing
    /// concurrent misses for the same key onto a single fetch.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::NotFound`] if either the metadata or the code
    /// artifact is absent.
    pub async fn load(&self, id: &FunctionId, version: Option<&Version>) -> Result<LoadResult, LoaderError> {
        let key = cache_key(id, version);
        let start = Instant::now();

        if let Some(entry) = self.cache.lock().await.get(&key).cloned() {
            return Ok(LoadResult {
                handle: entry.handle,
                from_cache: true,
                load_time_ms: start.elapsed().as_millis() as u64,
                degraded: entry.degraded,
                degradation_reason: entry.degradation_reason,
            });
        }

        let once = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result: Result<CacheEntry, LoaderError> = once
            .get_or_try_init(|| self.fetch(id, version))
            .await
            .map(Clone::clone);

        self.inflight.lock().await.remove(&key);

        let entry = result?;
        self.cache.lock().await.put(key, entry.clone());

        Ok(LoadResult {
            handle: entry.handle,
            from_cache: false,
            load_time_ms: start.elapsed().as_millis() as u64,
            degraded: entry.degraded,
            degradation_reason: entry.degradation_reason,
        })
    }

    async fn fetch(&self, id: &FunctionId, version: Option<&Version>) -> Result<CacheEntry, LoaderError> {
        let metadata = match version {
            Some(v) => self.registry.get_version(id, v).await,
            None => self.registry.get(id).await,
        }
        .ok_or(LoaderError::NotFound)?;

        let resolved = self
            .codestore
            .get_compiled_or_source(id, version, metadata.language.produces_binary_artifact())
            .await
            .ok_or(LoaderError::NotFound)?;

        let degraded = metadata.language.requires_compilation() && !resolved.used_precompiled;
        let degradation_reason = if degraded { resolved.fallback_reason.clone() } else { None };

        Ok(CacheEntry {
            handle: Arc::new(LoadedFunction {
                metadata,
                code: resolved.code,
            }),
            degraded,
            degradation_reason,
        })
    }

    /// Drop every cached entry for `id` (any version, and the latest
    /// pointer). Called by registry writes and `deleteAll`.
    pub async fn invalidate(&self, id: &FunctionId) {
        let prefix = format!("{id}@");
        let mut cache = self.cache.lock().await;
        let stale: Vec<String> = cache
            .iter()
            .map(|(k, _)| k.clone())
            .filter(|k| k.starts_with(&prefix))
            .collect();
        for key in stale {
            cache.pop(&key);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use fg_kv::InMemoryKv;

    fn id(s: &str) -> FunctionId {
        FunctionId::parse(s).unwrap()
    }

    fn loader() -> Loader<InMemoryKv> {
        let kv = Arc::new(InMemoryKv::new());
        let registry = Arc::new(Registry::new(kv.clone()));
        let codestore = Arc::new(CodeStore::new(kv));
        Loader::new(registry, codestore)
    }

    async fn deploy(l: &Loader<InMemoryKv>, fid: &FunctionId, lang: fg_core::Language, text: &str) {
        let metadata = FunctionMetadata {
            id: fid.clone(),
            version: Version::parse("1.0.0").unwrap(),
            language: lang,
            entry_point: lang.default_entry_point().to_string(),
            dependencies: Default::default(),
            created_at: None,
            updated_at: None,
            description: None,
            author: None,
        };
        l.codestore
            .put(fid, &CodeArtifact::Source { text: text.to_string() }, None)
            .await
            .unwrap();
        l.registry.put(metadata).await.unwrap();
    }

    #[tokio::test]
    async fn load_missing_function_errors_not_found() {
        let l = loader();
        let err = l.load(&id("ghost"), None).await.unwrap_err();
        assert!(matches!(err, LoaderError::NotFound));
    }

    #[tokio::test]
    async fn load_then_load_again_hits_cache() {
        let l = loader();
        let f1 = id("f1");
        deploy(&l, &f1, fg_core::Language::Javascript, "code").await;

        let first = l.load(&f1, None).await.unwrap();
        assert!(!first.from_cache);
        let second = l.load(&f1, None).await.unwrap();
        assert!(second.from_cache);
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_fetch() {
        let l = loader();
        let f1 = id("f1");
        deploy(&l, &f1, fg_core::Language::Javascript, "code").await;
        let _ = l.load(&f1, None).await.unwrap();
        l.invalidate(&f1).await;
        let reloaded = l.load(&f1, None).await.unwrap();
        assert!(!reloaded.from_cache);
    }

    #[tokio::test]
    async fn compiled_language_without_precompiled_artifact_reports_degraded() {
        let l = loader();
        let f1 = id("f1");
        // Rust requires compilation; only retaining source (no `put_compiled`) simulates
        // a function deployed without a precompiled binary reaching the code store.
        let metadata = FunctionMetadata {
            id: f1.clone(),
            version: Version::parse("1.0.0").unwrap(),
            language: fg_core::Language::Rust,
            entry_point: "main".to_string(),
            dependencies: Default::default(),
            created_at: None,
            updated_at: None,
            description: None,
            author: None,
        };
        l.registry.put(metadata).await.unwrap();
        l.codestore
            .put_compiled(
                &f1,
                &CodeArtifact::Source {
                    text: "fn main() {}".to_string(),
                },
                None,
                None,
            )
            .await
            .unwrap();

        let result = l.load(&f1, None).await.unwrap();
        assert!(result.degraded);
        assert_eq!(result.degradation_reason.as_deref(), Some("no_precompiled_code"));
    }

    #[tokio::test]
    async fn concurrent_loads_coalesce_onto_one_fetch() {
        let l = Arc::new(loader());
        let f1 = id("f1");
        deploy(&l, &f1, fg_core::Language::Javascript, "code").await;
        l.invalidate(&f1).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let l = l.clone();
            let f1 = f1.clone();
            handles.push(tokio::spawn(async move { l.load(&f1, None).await.unwrap() }));
        }
        let results: Vec<LoadResult> = futures_join_all(handles).await;
        assert!(results.iter().any(|r| !r.from_cache));
    }

    async fn futures_join_all(handles: Vec<tokio::task::JoinHandle<LoadResult>>) -> Vec<LoadResult> {
        let mut out = Vec::new();
        for h in handles {
            out.push(h.await.unwrap());
        }
        out
    }
}
