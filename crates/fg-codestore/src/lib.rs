// SPDX-License-Identifier: MIT OR Apache-2.0
//! Source and compiled artifact storage, keyed by `(function id, version)`
//! (spec §4.4).
//!
//! The code store exclusively owns artifact bytes. It is string-in,
//! string-out: a [`CodeArtifact::Binary`] payload is stored as the base64
//! text it already carries ("base64 means binary" — decoding is the
//! caller's responsibility, informed by the function's `language`).

#![deny(unsafe_code)]
#![warn(missing_docs)]

use fg_core::{CodeArtifact, FunctionId, Version};
use fg_kv::KvStore;
use std::sync::Arc;

const PREFIX: &str = "code:";

/// Failure modes for a code-store operation.
#[derive(Debug, thiserror::Error)]
pub enum CodeStoreError {
    /// The backing store could not be written to or read from.
    #[error("code store backend unavailable: {0}")]
    Unavailable(String),
}

/// The outcome of [`CodeStore::get_compiled_or_source`].
#[derive(Debug, Clone)]
pub struct ResolvedCode {
    /// The artifact actually returned.
    pub code: CodeArtifact,
    /// `true` if a precompiled artifact was found and returned.
    pub used_precompiled: bool,
    /// Why the precompiled artifact was unavailable, if `used_precompiled` is `false`.
    pub fallback_reason: Option<String>,
}

fn artifact_text(artifact: &CodeArtifact) -> &str {
    match artifact {
        CodeArtifact::Source { text } => text,
        CodeArtifact::Binary { base64 } => base64,
    }
}

fn wrap(raw: String, is_binary: bool) -> CodeArtifact {
    if is_binary {
        CodeArtifact::Binary { base64: raw }
    } else {
        CodeArtifact::Source { text: raw }
    }
}

fn plain_key(id: &FunctionId, version: Option<&Version>) -> String {
    match version {
        Some(v) => format!("{PREFIX}{id}:v:{v}"),
        None => format!("{PREFIX}{id}"),
    }
}

fn source_key(id: &FunctionId, version: Option<&Version>) -> String {
    match version {
        Some(v) => format!("{PREFIX}{id}:v:{v}:source"),
        None => format!("{PREFIX}{id}:source"),
    }
}

fn sourcemap_key(id: &FunctionId) -> String {
    format!("{PREFIX}{id}:sourcemap")
}

/// Artifact storage for function code, backed by a [`KvStore`].
pub struct CodeStore<K: KvStore> {
    kv: Arc<K>,
}

impl<K: KvStore> CodeStore<K> {
    /// Construct a code store fronting `kv`.
    #[must_use]
    pub fn new(kv: Arc<K>) -> Self {
        Self { kv }
    }

    /// Write `artifact` as the execution target at `(id, version)`, mirrored
    /// to the latest slot when `version` is `None`.
    pub async fn put(
        &self,
        id: &FunctionId,
        artifact: &CodeArtifact,
        version: Option<&Version>,
    ) -> Result<(), CodeStoreError> {
        self.kv
            .put(&plain_key(id, version), artifact_text(artifact).to_string())
            .await
            .map_err(|e| CodeStoreError::Unavailable(e.to_string()))
    }

    /// Write a compiled `artifact` as the execution target, retaining
    /// `source` (the original input) at the parallel `:source` key.
    pub async fn put_compiled(
        &self,
        id: &FunctionId,
        artifact: &CodeArtifact,
        source: Option<&CodeArtifact>,
        version: Option<&Version>,
    ) -> Result<(), CodeStoreError> {
        self.put(id, artifact, version).await?;
        if let Some(source) = source {
            self.kv
                .put(&source_key(id, version), artifact_text(source).to_string())
                .await
                .map_err(|e| CodeStoreError::Unavailable(e.to_string()))?;
        }
        Ok(())
    }

    /// Fetch the execution artifact for `(id, version)` (or the latest, if
    /// `version` is `None`). `is_binary` selects whether the stored text is
    /// wrapped as [`CodeArtifact::Source`] or [`CodeArtifact::Binary`].
    pub async fn get(
        &self,
        id: &FunctionId,
        version: Option<&Version>,
        is_binary: bool,
    ) -> Option<CodeArtifact> {
        self.kv
            .get(&plain_key(id, version))
            .await
            .ok()
            .flatten()
            .map(|raw| wrap(raw, is_binary))
    }

    /// Fetch the retained original source, if any, at `(id, version)`.
    pub async fn get_source(&self, id: &FunctionId, version: Option<&Version>) -> Option<CodeArtifact> {
        self.kv
            .get(&source_key(id, version))
            .await
            .ok()
            .flatten()
            .map(|raw| CodeArtifact::Source { text: raw })
    }

    /// Resolve the best available artifact: the compiled execution target if
    /// present, else the retained source, with `fallback_reason` set to
    /// `"no_precompiled_code"` in the latter case.
    pub async fn get_compiled_or_source(
        &self,
        id: &FunctionId,
        version: Option<&Version>,
        is_binary: bool,
    ) -> Option<ResolvedCode> {
        if let Some(code) = self.get(id, version, is_binary).await {
            return Some(ResolvedCode {
                code,
                used_precompiled: true,
                fallback_reason: None,
            });
        }
        self.get_source(id, version).await.map(|code| ResolvedCode {
            code,
            used_precompiled: false,
            fallback_reason: Some("no_precompiled_code".to_string()),
        })
    }

    /// Persist a source map (version=3 JSON) at `code:<id>:sourcemap`.
    pub async fn put_source_map(&self, id: &FunctionId, json: String) -> Result<(), CodeStoreError> {
        self.kv
            .put(&sourcemap_key(id), json)
            .await
            .map_err(|e| CodeStoreError::Unavailable(e.to_string()))
    }

    /// Fetch the source map for `id`, if any was produced.
    pub async fn get_source_map(&self, id: &FunctionId) -> Option<String> {
        self.kv.get(&sourcemap_key(id)).await.ok().flatten()
    }

    /// Remove every key prefixed `code:<id>`.
    pub async fn delete_all(&self, id: &FunctionId) {
        let prefix = format!("{PREFIX}{id}");
        if let Ok(keys) = self.kv.list(&prefix).await {
            for entry in keys {
                let _ = self.kv.delete(&entry.name).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
