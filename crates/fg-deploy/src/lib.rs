// SPDX-License-Identifier: MIT OR Apache-2.0
//! The deploy pipeline: parse, validate, compile, and persist a function
//! version (spec §4.8).
//!
//! Persistence happens in a fixed order — code store before registry — so
//! that a reader who finds metadata for `(id, version)` is always guaranteed
//! to find the matching artifact. See `DESIGN.md` for the tradeoff this
//! ordering accepts on a conflicting concurrent redeploy.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use fg_codestore::CodeStore;
use fg_compiler::{CompileError, WasmCompiler};
use fg_core::{CodeArtifact, FunctionId, FunctionMetadata, Language, Version};
use fg_error::GatewayError;
use fg_kv::KvStore;
use fg_loader::Loader;
use fg_registry::{Registry, RegistryError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The JSON shape a deploy request body is parsed into.
#[derive(Debug, Deserialize)]
struct DeployBody {
    id: Option<String>,
    version: Option<String>,
    language: Option<String>,
    code: Option<String>,
    #[serde(rename = "entryPoint")]
    entry_point: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    description: Option<String>,
    author: Option<String>,
}

/// The result of a successful deploy.
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    /// The deployed function's id.
    pub id: String,
    /// The deployed version.
    pub version: String,
    /// The invocation URL for this function.
    pub url: String,
    /// `true` if a compilation step ran.
    pub compiled: bool,
    /// When compilation completed, if it ran.
    pub compiled_at: Option<DateTime<Utc>>,
}

/// Deploys new function versions against a registry, code store, and loader.
pub struct Deployer<K: KvStore> {
    registry: Arc<Registry<K>>,
    codestore: Arc<CodeStore<K>>,
    loader: Arc<Loader<K>>,
    wasm: Option<Arc<dyn WasmCompiler>>,
    origin: String,
}

impl<K: KvStore> Deployer<K> {
    /// Construct a deployer. `origin` is prefixed onto the returned
    /// invocation URL (e.g. `"https://gateway.example.com"`).
    #[must_use]
    pub fn new(
        registry: Arc<Registry<K>>,
        codestore: Arc<CodeStore<K>>,
        loader: Arc<Loader<K>>,
        wasm: Option<Arc<dyn WasmCompiler>>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            codestore,
            loader,
            wasm,
            origin: origin.into(),
        }
    }

    /// Parse, validate, compile, and persist `raw_body` as a new function
    /// version.
    ///
    /// # Errors
    ///
    /// Returns `400` for malformed JSON, a missing required field, an
    /// invalid id/version/language/entryPoint/dependencies, or a compilation
    /// failure; `409` if `(id, version)` already holds different bytes.
    pub async fn deploy(&self, raw_body: &[u8]) -> Result<DeployOutcome, GatewayError> {
        let body: DeployBody =
            serde_json::from_slice(raw_body).map_err(|_| GatewayError::Validation("Invalid JSON".to_string()))?;

        let id = body
            .id
            .ok_or_else(|| GatewayError::Validation("Missing required field: id".to_string()))?;
        let version_str = body
            .version
            .ok_or_else(|| GatewayError::Validation("Missing required field: version".to_string()))?;
        let language_str = body
            .language
            .ok_or_else(|| GatewayError::Validation("Missing required field: language".to_string()))?;
        let code = body
            .code
            .ok_or_else(|| GatewayError::Validation("Missing required field: code".to_string()))?;

        let function_id = FunctionId::parse(id)?;
        let version = Version::parse(version_str)?;
        let language = parse_language(&language_str)?;
        let entry_point = body
            .entry_point
            .unwrap_or_else(|| language.default_entry_point().to_string());

        let compiled = fg_compiler::compile(language, &code, self.wasm.as_deref()).map_err(|e| match e {
            CompileError::Syntax { message, line, column } => GatewayError::Compilation { message, line, column },
            CompileError::NoBackend(lang) => GatewayError::Compilation {
                message: format!("no compiler backend configured for {lang}"),
                line: None,
                column: None,
            },
        })?;

        let metadata = FunctionMetadata {
            id: function_id.clone(),
            version: version.clone(),
            language,
            entry_point,
            dependencies: body.dependencies,
            created_at: None,
            updated_at: None,
            description: body.description,
            author: body.author,
        };
        metadata.validate()?;

        let source_artifact = CodeArtifact::Source { text: code };
        let retained_source = if language.requires_compilation() {
            Some(&source_artifact)
        } else {
            None
        };

        self.codestore
            .put_compiled(&function_id, &compiled.artifact, retained_source, Some(&version))
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        self.codestore
            .put_compiled(&function_id, &compiled.artifact, retained_source, None)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        if let Some(source_map) = &compiled.source_map {
            self.codestore
                .put_source_map(&function_id, source_map.clone())
                .await
                .map_err(|e| GatewayError::Internal(e.to_string()))?;
        }

        self.registry
            .put_version(&function_id, &version, metadata.clone())
            .await
            .map_err(map_registry_error)?;
        self.registry.put(metadata).await.map_err(map_registry_error)?;

        self.loader.invalidate(&function_id).await;

        Ok(DeployOutcome {
            id: function_id.to_string(),
            version: version.to_string(),
            url: format!("{}/functions/{}", self.origin, function_id),
            compiled: compiled.compiled,
            compiled_at: compiled.compiled_at,
        })
    }
}

fn parse_language(raw: &str) -> Result<Language, GatewayError> {
    let quoted = serde_json::Value::String(raw.to_string());
    serde_json::from_value(quoted)
        .map_err(|_| GatewayError::Validation(format!("language: '{raw}' is not a supported language")))
}

fn map_registry_error(err: RegistryError) -> GatewayError {
    match err {
        RegistryError::VersionExists => GatewayError::VersionExists,
        RegistryError::Validation(e) => e.into(),
        RegistryError::VersionNotFound => GatewayError::Internal("unexpected version-not-found during deploy".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use fg_kv::InMemoryKv;
    use serde_json::json;

    fn deployer() -> Deployer<InMemoryKv> {
        let kv = Arc::new(InMemoryKv::new());
        let registry = Arc::new(Registry::new(kv.clone()));
        let codestore = Arc::new(CodeStore::new(kv.clone()));
        let loader = Arc::new(Loader::new(registry.clone(), codestore.clone()));
        Deployer::new(registry, codestore, loader, None, "https://gateway.example.com")
    }

    #[tokio::test]
    async fn deploy_javascript_persists_and_returns_url() {
        let d = deployer();
        let body = json!({
            "id": "hello",
            "version": "1.0.0",
            "language": "javascript",
            "code": "export default () => 'hi'",
        });
        let outcome = d.deploy(body.to_string().as_bytes()).await.unwrap();
        assert_eq!(outcome.id, "hello");
        assert_eq!(outcome.version, "1.0.0");
        assert_eq!(outcome.url, "https://gateway.example.com/functions/hello");
        assert!(!outcome.compiled);

        let metadata = d
            .registry
            .get(&FunctionId::parse("hello").unwrap())
            .await
            .unwrap();
        assert_eq!(metadata.entry_point, "index.js");
    }

    #[tokio::test]
    async fn deploy_typescript_strips_types_and_marks_compiled() {
        let d = deployer();
        let body = json!({
            "id": "typed",
            "version": "1.0.0",
            "language": "typescript",
            "code": "function add(a: number, b: number): number { return a + b; }",
        });
        let outcome = d.deploy(body.to_string().as_bytes()).await.unwrap();
        assert!(outcome.compiled);
        assert!(outcome.compiled_at.is_some());
    }

    #[tokio::test]
    async fn missing_required_field_is_400() {
        let d = deployer();
        let body = json!({"id": "hello", "version": "1.0.0", "language": "javascript"});
        let err = d.deploy(body.to_string().as_bytes()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(msg) if msg.contains("code")));
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let d = deployer();
        let err = d.deploy(b"{not json").await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_language_is_400() {
        let d = deployer();
        let body = json!({"id": "hello", "version": "1.0.0", "language": "cobol", "code": "x"});
        let err = d.deploy(body.to_string().as_bytes()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn redeploy_identical_bytes_is_idempotent() {
        let d = deployer();
        let body = json!({"id": "hello", "version": "1.0.0", "language": "javascript", "code": "x"});
        d.deploy(body.to_string().as_bytes()).await.unwrap();
        let second = d.deploy(body.to_string().as_bytes()).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn redeploy_different_bytes_is_409() {
        let d = deployer();
        let first = json!({"id": "hello", "version": "1.0.0", "language": "javascript", "code": "x"});
        d.deploy(first.to_string().as_bytes()).await.unwrap();
        let second = json!({"id": "hello", "version": "1.0.0", "language": "javascript", "code": "y"});
        let err = d.deploy(second.to_string().as_bytes()).await.unwrap_err();
        assert!(matches!(err, GatewayError::VersionExists));
    }

    #[tokio::test]
    async fn invalid_entry_point_is_rejected() {
        let d = deployer();
        let body = json!({
            "id": "hello",
            "version": "1.0.0",
            "language": "javascript",
            "code": "x",
            "entryPoint": "/etc/passwd",
        });
        let err = d.deploy(body.to_string().as_bytes()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[tokio::test]
    async fn deploy_invalidates_loader_cache() {
        let d = deployer();
        let body = json!({"id": "hello", "version": "1.0.0", "language": "javascript", "code": "v1"});
        d.deploy(body.to_string().as_bytes()).await.unwrap();
        let _ = d.loader.load(&FunctionId::parse("hello").unwrap(), None).await.unwrap();

        let body_v2 = json!({"id": "hello", "version": "2.0.0", "language": "javascript", "code": "v2"});
        d.deploy(body_v2.to_string().as_bytes()).await.unwrap();

        let loaded = d.loader.load(&FunctionId::parse("hello").unwrap(), None).await.unwrap();
        assert!(!loaded.from_cache);
    }
}
