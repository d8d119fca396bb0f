// SPDX-License-Identifier: MIT OR Apache-2.0
//! The gateway's HTTP surface: route table, request extraction, and
//! everything that turns an Axum request into the narrow types the
//! domain crates actually consume.
//!
//! This crate owns no business logic. Every handler's job is to pull the
//! bytes axum handed it into a domain request, call the collaborator that
//! already knows the rule, and translate the result back into a response.

#![deny(unsafe_code)]

pub mod api;
pub mod middleware;
pub mod validation;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path as AxPath, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    middleware::from_fn,
    response::{IntoResponse, Response},
    routing::get,
};
use fg_codestore::CodeStore;
use fg_core::FunctionId;
use fg_credentials::{extract_presented_key, AuthFailure, CredentialStore};
use fg_deploy::Deployer;
use fg_error::GatewayError;
use fg_kv::KvStore;
use fg_loader::Loader;
use fg_orchestrator::{InvocationRequest, Orchestrator};
use fg_ratelimit::extract_client_ip;
use fg_registry::Registry;
use fg_telemetry::{InvocationMetrics, MetricsCollector};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

pub use api::{InMemoryLogStore, LogStore, LogStoreError};
pub use middleware::CorsConfig;

/// Shared state every handler reaches through an Axum [`State`] extractor.
pub struct AppState<K: KvStore> {
    pub credentials: Arc<CredentialStore<K>>,
    pub registry: Arc<Registry<K>>,
    pub codestore: Arc<CodeStore<K>>,
    pub loader: Arc<Loader<K>>,
    pub orchestrator: Arc<Orchestrator<K>>,
    pub deployer: Arc<Deployer<K>>,
    pub metrics: Arc<MetricsCollector>,
    pub log_store: Option<Arc<dyn LogStore>>,
    pub cors: CorsConfig,
}

/// Build the Axum router wiring every gateway route to its handler.
///
/// Routes fall into two families: the management API under `/api/functions`
/// (list/deploy/info/delete/logs, all authenticated) and the invocation
/// surface under `/functions/<id>` that [`fg_orchestrator::Orchestrator`]
/// owns end to end, including its own authentication and rate limiting.
pub fn build_app<K: KvStore + 'static>(state: Arc<AppState<K>>) -> Router {
    let cors = state.cors.to_cors_layer();

    Router::new()
        .route("/", get(health_handler))
        .route("/health", get(health_handler))
        .route(
            "/api/functions",
            get(list_handler::<K>).post(deploy_handler::<K>),
        )
        .route(
            "/api/functions/{id}",
            get(info_handler::<K>).delete(delete_handler::<K>),
        )
        .route("/api/functions/{id}/logs", get(logs_handler::<K>))
        .route(
            "/functions/{id}",
            get(invoke_handler::<K>).post(invoke_handler::<K>),
        )
        .route(
            "/functions/{id}/{action}",
            get(invoke_handler::<K>).post(invoke_handler::<K>),
        )
        .layer(from_fn(middleware::RequestLogger::layer))
        .layer(from_fn(middleware::request_id_middleware))
        .layer(cors)
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn require_auth<K: KvStore>(
    credentials: &CredentialStore<K>,
    headers: &HeaderMap,
) -> Result<(), GatewayError> {
    let presented = extract_presented_key(|name| {
        headers.get(name).and_then(|v| v.to_str().ok()).map(String::from)
    });
    let Some(presented) = presented else {
        return Err(GatewayError::missing_api_key());
    };
    credentials.verify(&presented).await.map_err(|failure| match failure {
        AuthFailure::Missing => GatewayError::missing_api_key(),
        AuthFailure::Expired => GatewayError::expired_api_key(),
        AuthFailure::Unknown | AuthFailure::Inactive => GatewayError::invalid_api_key(),
    })?;
    Ok(())
}

async fn list_handler<K: KvStore>(
    State(state): State<Arc<AppState<K>>>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    require_auth(&state.credentials, &headers).await?;
    let functions = state.registry.list().await;
    let summaries: Vec<_> = functions
        .iter()
        .map(|f| {
            json!({
                "id": f.id.as_str(),
                "version": f.version.as_str(),
                "language": f.language,
            })
        })
        .collect();
    Ok(Json(json!({ "functions": summaries })).into_response())
}

async fn deploy_handler<K: KvStore>(
    State(state): State<Arc<AppState<K>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    require_auth(&state.credentials, &headers).await?;

    let violations = validation::guard_deploy_body(&body);
    if !violations.is_empty() {
        return Err(GatewayError::Validation(violations.join("; ")));
    }

    let outcome = state.deployer.deploy(&body).await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "id": outcome.id,
            "version": outcome.version,
            "url": outcome.url,
            "compiled": outcome.compiled,
            "compiledAt": outcome.compiled_at,
        })),
    )
        .into_response())
}

async fn info_handler<K: KvStore>(
    State(state): State<Arc<AppState<K>>>,
    AxPath(id): AxPath<String>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    require_auth(&state.credentials, &headers).await?;
    let fid = FunctionId::parse(id)?;
    let metadata = state
        .registry
        .get(&fid)
        .await
        .ok_or_else(|| GatewayError::NotFound(format!("function '{}' not found", fid.as_str())))?;

    Ok(Json(json!({
        "id": metadata.id.as_str(),
        "status": "available",
        "version": metadata.version.as_str(),
        "language": metadata.language,
        "entryPoint": metadata.entry_point,
        "dependencies": metadata.dependencies,
    }))
    .into_response())
}

async fn delete_handler<K: KvStore>(
    State(state): State<Arc<AppState<K>>>,
    AxPath(id): AxPath<String>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    require_auth(&state.credentials, &headers).await?;
    let fid = FunctionId::parse(id)?;

    if state.registry.get(&fid).await.is_none() {
        return Err(GatewayError::NotFound(format!(
            "function '{}' not found",
            fid.as_str()
        )));
    }

    state.registry.delete(&fid).await;
    state.codestore.delete_all(&fid).await;
    state.loader.invalidate(&fid).await;

    Ok(Json(json!({ "id": fid.as_str(), "deleted": true })).into_response())
}

async fn logs_handler<K: KvStore>(
    State(state): State<Arc<AppState<K>>>,
    AxPath(id): AxPath<String>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    require_auth(&state.credentials, &headers).await?;
    let fid = FunctionId::parse(id)?;

    let Some(store) = &state.log_store else {
        return Err(GatewayError::log_store_not_configured());
    };

    let logs = store
        .fetch_logs(fid.as_str())
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    Ok(Json(logs).into_response())
}

async fn invoke_handler<K: KvStore>(
    State(state): State<Arc<AppState<K>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let path = match uri.query() {
        Some(q) => format!("{}?{q}", uri.path()),
        None => uri.path().to_string(),
    };

    let function_id_header = headers
        .get("x-function-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let client_ip = extract_client_ip(|name| {
        headers.get(name).and_then(|v| v.to_str().ok()).map(String::from)
    });
    let presented_key =
        extract_presented_key(|name| headers.get(name).and_then(|v| v.to_str().ok()).map(String::from));
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let req = InvocationRequest {
        method: method.as_str().to_string(),
        path,
        function_id_header,
        client_ip,
        presented_key,
        content_type,
        body: body.to_vec(),
    };

    let start = Instant::now();
    let outcome = state.orchestrator.handle(req).await?;
    let duration_ms = start.elapsed().as_millis() as u64;

    let function_id = outcome
        .body
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let errors_count = u64::from(outcome.status >= 400 || outcome.body.get("error").is_some());
    state.metrics.record(InvocationMetrics {
        function_id,
        language: String::new(),
        duration_ms,
        status: outcome.status,
        from_cache: false,
        errors_count,
    });

    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok((status, Json(outcome.body)).into_response())
}
