// SPDX-License-Identifier: MIT OR Apache-2.0
//! The narrow sandbox contract the orchestrator dispatches invocations
//! through (spec §4.9 / §9 "Sandbox polymorphism").
//!
//! The orchestrator never assumes more than `get(instanceId, factory) →
//! stub`, `stub.get_entrypoint() → entrypoint`, `entrypoint.fetch(request) →
//! response`. Implementers provide one adapter per deployment target
//! (a Wasm isolate pool, a subprocess runner, a remote worker fleet); this
//! crate only fixes the shape they must expose.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Failure modes surfaced by a sandbox implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxError {
    /// The factory-described module could not be instantiated.
    #[error("sandbox instantiation failed: {0}")]
    InstantiationFailed(String),
    /// The entrypoint's `fetch` call failed (distinct from a function
    /// returning a non-2xx response, which is a normal [`SandboxResponse`]).
    #[error("sandbox dispatch failed: {0}")]
    DispatchFailed(String),
    /// The sandbox call exceeded its deadline.
    #[error("sandbox dispatch timed out")]
    Timeout,
}

/// What a lazily-invoked factory hands the sandbox to build an instance.
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    /// The entry module name, resolved against `modules`.
    pub main_module: String,
    /// Module name to source-text mapping.
    pub modules: BTreeMap<String, String>,
    /// An opaque compatibility marker the sandbox may use to pin runtime behavior.
    pub compatibility_date: String,
}

/// A request synthesized for dispatch into the sandbox (spec §4.7 step 9).
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    /// Always `POST` for invocation dispatch.
    pub method: String,
    /// Always `http://sandbox/invoke` for invocation dispatch.
    pub url: String,
    /// A single `Content-Type` header in practice; kept general for adapters.
    pub headers: BTreeMap<String, String>,
    /// `JSON.stringify(normalizedBody)`.
    pub body: String,
}

/// A response returned by the sandboxed function.
#[derive(Debug, Clone)]
pub struct SandboxResponse {
    /// HTTP-style status the function's handler returned.
    pub status: u16,
    /// Response headers, if any (used to detect `application/json`).
    pub headers: BTreeMap<String, String>,
    /// Raw response body text.
    pub body: String,
}

impl SandboxResponse {
    /// `true` if the `Content-Type` header names `application/json`.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.headers
            .get("content-type")
            .or_else(|| self.headers.get("Content-Type"))
            .is_some_and(|v| v.starts_with("application/json"))
    }
}

/// The handle returned by [`Stub::get_entrypoint`]: the one thing the
/// orchestrator ever calls into.
#[async_trait]
pub trait Entrypoint: Send + Sync {
    /// Dispatch `request` into the running function, returning its response.
    async fn fetch(&self, request: SandboxRequest) -> Result<SandboxResponse, SandboxError>;
}

/// A live (or lazily-warming) sandbox instance.
pub trait Stub: Send + Sync {
    /// Obtain the callable entrypoint for this instance.
    fn get_entrypoint(&self) -> Arc<dyn Entrypoint>;
}

/// The sandbox as the orchestrator consumes it: `get` returns a memoized
/// [`Stub`] for `instance_id`, calling `factory` only on first access.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Fetch (or lazily create) the stub for `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InstantiationFailed`] if `factory`'s module
    /// spec cannot be instantiated.
    async fn get(
        &self,
        instance_id: &str,
        factory: &(dyn Fn() -> ModuleSpec + Send + Sync),
    ) -> Result<Arc<dyn Stub>, SandboxError>;
}

// ---------------------------------------------------------------------------
// In-process mock, for tests and for deployments with no real isolate pool.
// ---------------------------------------------------------------------------

/// An [`Entrypoint`] that echoes its request body back as a JSON response,
/// matching the "sandbox that echoes `{msg: body.msg}`" scenario.
pub struct EchoEntrypoint;

#[async_trait]
impl Entrypoint for EchoEntrypoint {
    async fn fetch(&self, request: SandboxRequest) -> Result<SandboxResponse, SandboxError> {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Ok(SandboxResponse {
            status: 200,
            headers,
            body: request.body,
        })
    }
}

struct MockStub {
    entrypoint: Arc<dyn Entrypoint>,
}

impl Stub for MockStub {
    fn get_entrypoint(&self) -> Arc<dyn Entrypoint> {
        self.entrypoint.clone()
    }
}

/// A single-process [`Sandbox`] backed by an in-memory instance map, for
/// tests and for deployments that run functions in-process.
#[derive(Default)]
pub struct MockSandbox {
    instances: Mutex<BTreeMap<String, Arc<MockStub>>>,
    entrypoint: Option<Arc<dyn Entrypoint>>,
}

impl MockSandbox {
    /// Construct a mock sandbox whose instances all share `entrypoint`
    /// (defaulting to [`EchoEntrypoint`] when `None`).
    #[must_use]
    pub fn new(entrypoint: Option<Arc<dyn Entrypoint>>) -> Self {
        Self {
            instances: Mutex::new(BTreeMap::new()),
            entrypoint,
        }
    }

    /// Number of distinct instances the factory has actually been invoked for.
    pub async fn instance_count(&self) -> usize {
        self.instances.lock().await.len()
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    async fn get(
        &self,
        instance_id: &str,
        factory: &(dyn Fn() -> ModuleSpec + Send + Sync),
    ) -> Result<Arc<dyn Stub>, SandboxError> {
        let mut instances = self.instances.lock().await;
        if let Some(existing) = instances.get(instance_id) {
            return Ok(existing.clone() as Arc<dyn Stub>);
        }
        let _spec = factory();
        let entrypoint = self
            .entrypoint
            .clone()
            .unwrap_or_else(|| Arc::new(EchoEntrypoint) as Arc<dyn Entrypoint>);
        let stub = Arc::new(MockStub { entrypoint });
        instances.insert(instance_id.to_string(), stub.clone());
        Ok(stub as Arc<dyn Stub>)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
