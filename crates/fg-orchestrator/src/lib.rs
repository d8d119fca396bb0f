// SPDX-License-Identifier: MIT OR Apache-2.0
//! The invocation pipeline: routing, authentication, rate limiting, registry
//! lookup, body normalization, and sandbox dispatch (spec §4.7).
//!
//! [`Orchestrator::handle`] runs every `/functions/<id>[/<action>]` request
//! through these stages in order. None of them take `axum` request types
//! directly — the caller extracts headers, the client IP, and the raw body
//! once, and hands over an [`InvocationRequest`], keeping this crate testable
//! without spinning up a router.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use fg_core::FunctionId;
use fg_credentials::{is_public, AuthFailure, CredentialStore};
use fg_error::GatewayError;
use fg_kv::KvStore;
use fg_loader::Loader;
use fg_ratelimit::CompositeLimiter;
use fg_registry::Registry;
use fg_sandbox::{ModuleSpec, Sandbox, SandboxError, SandboxRequest};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Which legacy action suffix (`/info` or `/invoke`) a path named, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAction {
    /// `/functions/<id>/info`.
    Info,
    /// `/functions/<id>/invoke`.
    Invoke,
}

/// A request bound for the invocation pipeline, already stripped of
/// transport-specific detail.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// `"GET"`, `"POST"`, or any other uppercase HTTP method name.
    pub method: String,
    /// The request path, e.g. `/functions/hello/invoke`.
    pub path: String,
    /// The `X-Function-Id` header value, if present.
    pub function_id_header: Option<String>,
    /// The client IP, as resolved by [`fg_ratelimit::extract_client_ip`].
    pub client_ip: String,
    /// The raw API key extracted via [`fg_credentials::extract_presented_key`].
    pub presented_key: Option<String>,
    /// The request's `Content-Type` header, if any.
    pub content_type: Option<String>,
    /// The raw request body.
    pub body: Vec<u8>,
}

/// The outcome of a successful [`Orchestrator::handle`] call: a status and a
/// JSON body, ready to serialize as the HTTP response.
#[derive(Debug, Clone)]
pub struct OrchestratorResponse {
    /// HTTP status to report. Function-level failures still report `200`.
    pub status: u16,
    /// The JSON response body.
    pub body: Value,
}

/// Collaborators and policy the orchestrator needs to run the pipeline.
pub struct Orchestrator<K: KvStore> {
    credentials: Arc<CredentialStore<K>>,
    limiter: Arc<CompositeLimiter>,
    registry: Arc<Registry<K>>,
    loader: Arc<Loader<K>>,
    sandbox: Option<Arc<dyn Sandbox>>,
    dispatch_fallback: Option<Arc<dyn Sandbox>>,
    public_paths: Vec<String>,
    sandbox_timeout: Duration,
    executed_with: String,
}

impl<K: KvStore> Orchestrator<K> {
    /// Construct an orchestrator. `sandbox` is `None` when no execution
    /// backend has been wired in yet; invocations then fail `501`.
    #[must_use]
    pub fn new(
        credentials: Arc<CredentialStore<K>>,
        limiter: Arc<CompositeLimiter>,
        registry: Arc<Registry<K>>,
        loader: Arc<Loader<K>>,
        sandbox: Option<Arc<dyn Sandbox>>,
    ) -> Self {
        Self {
            credentials,
            limiter,
            registry,
            loader,
            sandbox,
            dispatch_fallback: None,
            public_paths: Vec::new(),
            sandbox_timeout: Duration::from_secs(30),
            executed_with: "sandbox".to_string(),
        }
    }

    /// Configure the public paths exempt from authentication and rate
    /// limiting, on top of [`fg_credentials::DEFAULT_PUBLIC_PATHS`].
    #[must_use]
    pub fn with_public_paths(mut self, public_paths: Vec<String>) -> Self {
        self.public_paths = public_paths;
        self
    }

    /// Set the wall-clock deadline applied to sandbox dispatch.
    #[must_use]
    pub fn with_sandbox_timeout(mut self, timeout: Duration) -> Self {
        self.sandbox_timeout = timeout;
        self
    }

    /// Register a secondary sandbox binding consulted when the primary
    /// dispatch fails with [`SandboxError::DispatchFailed`].
    #[must_use]
    pub fn with_dispatch_fallback(mut self, fallback: Arc<dyn Sandbox>) -> Self {
        self.dispatch_fallback = Some(fallback);
        self
    }

    /// Tag merged into `_meta.executedWith` on a successful dispatch.
    #[must_use]
    pub fn with_executed_with(mut self, executed_with: impl Into<String>) -> Self {
        self.executed_with = executed_with.into();
        self
    }

    /// Run `req` through the full pipeline: routing, authentication, rate
    /// limiting, registry lookup, method dispatch, and (for invocations)
    /// body normalization and sandbox dispatch.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] for every system-level failure (bad
    /// routing, authentication, rate limiting, a missing function, an
    /// unsupported method, or an absent/failing sandbox). A failure
    /// reported by the *function itself* is not an `Err` — it is wrapped
    /// into a `200` [`OrchestratorResponse`].
    pub async fn handle(&self, req: InvocationRequest) -> Result<OrchestratorResponse, GatewayError> {
        let (id_str, action) = route(&req.path, req.function_id_header.as_deref())?;
        let function_id = FunctionId::parse(id_str)?;

        let public = is_public(&req.path, &self.public_paths);

        if !public {
            self.authenticate(req.presented_key.as_deref(), &function_id).await?;
        }

        if !public {
            self.enforce_rate_limit(&req.client_ip, &function_id).await?;
        }

        let metadata = self
            .registry
            .get(&function_id)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("function {function_id}")))?;

        match (req.method.as_str(), action) {
            ("GET", None | Some(RouteAction::Info)) => Ok(OrchestratorResponse {
                status: 200,
                body: json!({
                    "id": metadata.id.to_string(),
                    "status": "available",
                    "version": metadata.version.to_string(),
                    "language": metadata.language.to_string(),
                    "entryPoint": metadata.entry_point,
                }),
            }),
            ("POST", None | Some(RouteAction::Invoke)) => self.invoke(&function_id, req).await,
            (method, _) => Err(GatewayError::MethodNotAllowed(method.to_string())),
        }
    }

    async fn authenticate(&self, presented_key: Option<&str>, function_id: &FunctionId) -> Result<(), GatewayError> {
        let key = presented_key.unwrap_or("");
        let authenticated = match self.credentials.verify(key).await {
            Ok(authenticated) => authenticated,
            Err(AuthFailure::Missing) => return Err(GatewayError::missing_api_key()),
            Err(AuthFailure::Expired) => return Err(GatewayError::expired_api_key()),
            Err(AuthFailure::Unknown | AuthFailure::Inactive) => return Err(GatewayError::invalid_api_key()),
        };

        if let Some(bound) = &authenticated.function_id {
            if bound != function_id {
                return Err(GatewayError::invalid_api_key());
            }
        }
        Ok(())
    }

    async fn enforce_rate_limit(&self, client_ip: &str, function_id: &FunctionId) -> Result<(), GatewayError> {
        let mut keys = HashMap::new();
        keys.insert("ip".to_string(), client_ip.to_string());
        keys.insert("function".to_string(), function_id.to_string());

        let result = self.limiter.check_and_increment_all(&keys).await;
        if result.allowed {
            return Ok(());
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        Err(GatewayError::RateLimited {
            retry_after_secs: result.retry_after_secs(now_ms),
            reset_at_ms: result.blocking_reset_at_ms().unwrap_or(now_ms),
            blocking_category: result.blocking_category.clone().unwrap_or_default(),
        })
    }

    async fn invoke(&self, function_id: &FunctionId, req: InvocationRequest) -> Result<OrchestratorResponse, GatewayError> {
        let Some(sandbox) = &self.sandbox else {
            return Err(GatewayError::sandbox_not_configured());
        };

        let load = self
            .loader
            .load(function_id, None)
            .await
            .map_err(|_| GatewayError::NotFound(format!("function {function_id}")))?;

        if load.degraded {
            let reason = load.degradation_reason.clone().unwrap_or_else(|| "degraded".to_string());
            return Err(GatewayError::NotConfigured {
                what: format!("precompiled artifact ({reason})"),
                status: axum::http::StatusCode::NOT_IMPLEMENTED,
            });
        }

        let normalized = normalize_body(req.content_type.as_deref(), &req.body).await?;
        let dispatch_body = reshape_for_rpc(normalized);

        let handle = load.handle.clone();
        let entry_point = handle.metadata.entry_point.clone();
        let code_text = match &handle.code {
            fg_core::CodeArtifact::Source { text } => text.clone(),
            fg_core::CodeArtifact::Binary { base64 } => base64.clone(),
        };
        let factory = move || {
            let mut modules = BTreeMap::new();
            modules.insert(entry_point.clone(), code_text.clone());
            ModuleSpec {
                main_module: entry_point.clone(),
                modules,
                compatibility_date: "2026-01-01".to_string(),
            }
        };

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let sandbox_request = SandboxRequest {
            method: "POST".to_string(),
            url: "http://sandbox/invoke".to_string(),
            headers,
            body: serde_json::to_string(&dispatch_body).unwrap_or_else(|_| "{}".to_string()),
        };

        let start = Instant::now();
        let dispatch = self
            .dispatch(sandbox, function_id.as_str(), &factory, sandbox_request.clone())
            .await;

        let response = match dispatch {
            Ok(response) => response,
            Err(SandboxError::Timeout) => {
                let duration = start.elapsed().as_millis() as u64;
                let meta = json!({"duration": duration, "executedWith": self.executed_with});
                return Ok(OrchestratorResponse {
                    status: 200,
                    body: fg_error::function_error_body("Timeout", meta),
                });
            }
            Err(SandboxError::DispatchFailed(reason)) => {
                if let Some(fallback) = &self.dispatch_fallback {
                    match self
                        .dispatch(fallback, function_id.as_str(), &factory, sandbox_request)
                        .await
                    {
                        Ok(response) => response,
                        Err(_) => return Err(GatewayError::Internal(reason)),
                    }
                } else {
                    return Err(GatewayError::Internal(reason));
                }
            }
            Err(SandboxError::InstantiationFailed(reason)) => {
                return Err(GatewayError::Internal(reason));
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        Ok(OrchestratorResponse {
            status: 200,
            body: wrap_response(response, duration_ms, &self.executed_with),
        })
    }

    async fn dispatch(
        &self,
        sandbox: &Arc<dyn Sandbox>,
        instance_id: &str,
        factory: &(dyn Fn() -> ModuleSpec + Send + Sync),
        request: SandboxRequest,
    ) -> Result<fg_sandbox::SandboxResponse, SandboxError> {
        let stub = sandbox.get(instance_id, factory).await?;
        let entrypoint = stub.get_entrypoint();
        match tokio::time::timeout(self.sandbox_timeout, entrypoint.fetch(request)).await {
            Ok(result) => result,
            Err(_) => Err(SandboxError::Timeout),
        }
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

fn route(path: &str, function_id_header: Option<&str>) -> Result<(String, Option<RouteAction>), GatewayError> {
    let path = path.split('?').next().unwrap_or(path);

    if let Some(rest) = path.strip_prefix("/functions/") {
        let mut parts = rest.splitn(2, '/');
        let id = parts.next().unwrap_or("");
        if id.is_empty() {
            return Err(GatewayError::Validation("function id is required".to_string()));
        }
        let action = match parts.next() {
            Some("info") => Some(RouteAction::Info),
            Some("invoke") => Some(RouteAction::Invoke),
            _ => None,
        };
        return Ok((id.to_string(), action));
    }

    if let Some(header) = function_id_header {
        if !header.is_empty() {
            return Ok((header.to_string(), None));
        }
    }

    Err(GatewayError::Validation("function id is required".to_string()))
}

// ---------------------------------------------------------------------------
// Body normalization
// ---------------------------------------------------------------------------

async fn normalize_body(content_type: Option<&str>, body: &[u8]) -> Result<Value, GatewayError> {
    let content_type = content_type.unwrap_or("");

    if content_type.starts_with("application/json") {
        if body.is_empty() {
            return Ok(json!({}));
        }
        return serde_json::from_slice(body).map_err(|_| GatewayError::Validation("Invalid JSON".to_string()));
    }

    if content_type.starts_with("multipart/form-data") {
        return decode_multipart(content_type, body).await;
    }

    if content_type.starts_with("text/plain") {
        return Ok(json!({ "text": String::from_utf8_lossy(body).into_owned() }));
    }

    Ok(json!({}))
}

async fn decode_multipart(content_type: &str, body: &[u8]) -> Result<Value, GatewayError> {
    let boundary = multer::parse_boundary(content_type)
        .map_err(|_| GatewayError::Validation("invalid multipart body".to_string()))?;
    let stream = tokio_stream::once(Ok::<_, std::io::Error>(bytes::Bytes::copy_from_slice(body)));
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut map = Map::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| GatewayError::Validation("invalid multipart body".to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        let text = field
            .text()
            .await
            .map_err(|_| GatewayError::Validation("invalid multipart body".to_string()))?;
        map.insert(name, Value::String(text));
    }
    Ok(Value::Object(map))
}

/// If `body` carries a non-empty `method` field, reshape it into the
/// narrower `{method, params}` form dispatched to the sandbox's single
/// `fetch` affordance — the sandbox contract has no `target.invoke` concept
/// of its own to delegate to (see `DESIGN.md`).
fn reshape_for_rpc(body: Value) -> Value {
    let Value::Object(map) = &body else {
        return body;
    };
    let Some(Value::String(method)) = map.get("method") else {
        return body;
    };
    if method.is_empty() {
        return body;
    }
    let params = map.get("params").cloned().unwrap_or_else(|| json!([]));
    json!({ "method": method, "params": params })
}

// ---------------------------------------------------------------------------
// Response wrapping
// ---------------------------------------------------------------------------

fn wrap_response(response: fg_sandbox::SandboxResponse, duration_ms: u64, executed_with: &str) -> Value {
    let meta = json!({"duration": duration_ms, "executedWith": executed_with});

    if response.is_json() {
        match serde_json::from_str::<Value>(&response.body) {
            Ok(Value::Object(mut map)) => {
                map.insert("_meta".to_string(), meta);
                return Value::Object(map);
            }
            Ok(other) => {
                return json!({"result": other, "_meta": meta});
            }
            Err(_) => {}
        }
    }

    json!({"result": response.body, "status": response.status, "_meta": meta})
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
