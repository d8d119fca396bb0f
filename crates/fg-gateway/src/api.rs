// SPDX-License-Identifier: MIT OR Apache-2.0
//! The log-store contract consumed by `GET /api/functions/<id>/logs` (spec
//! §4.9: "proxied to an external log store"). This mirrors the narrow-trait
//! treatment `fg-sandbox` gives the execution substrate: the gateway only
//! fixes the shape a log backend must expose, and never grows that backend
//! itself.

use async_trait::async_trait;
use serde_json::Value;

/// Failure modes a [`LogStore`] implementation can report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LogStoreError {
    /// The backing log service could not be reached or returned an error.
    #[error("log store unavailable: {0}")]
    Unavailable(String),
}

/// The narrow contract the logs proxy consumes: fetch recent log entries
/// for a function id, as an opaque JSON value the gateway forwards
/// untouched.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Fetch recent log entries for `function_id`.
    async fn fetch_logs(&self, function_id: &str) -> Result<Value, LogStoreError>;
}

/// An in-memory [`LogStore`] for tests and demo deployments: returns
/// whatever entries were recorded via [`InMemoryLogStore::push`], in
/// insertion order, newest last.
#[derive(Debug, Default)]
pub struct InMemoryLogStore {
    entries: tokio::sync::Mutex<std::collections::BTreeMap<String, Vec<Value>>>,
}

impl InMemoryLogStore {
    /// Construct an empty log store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a log entry for `function_id`.
    pub async fn push(&self, function_id: &str, entry: Value) {
        self.entries
            .lock()
            .await
            .entry(function_id.to_string())
            .or_default()
            .push(entry);
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn fetch_logs(&self, function_id: &str) -> Result<Value, LogStoreError> {
        let entries = self.entries.lock().await;
        Ok(serde_json::json!({
            "functionId": function_id,
            "entries": entries.get(function_id).cloned().unwrap_or_default(),
        }))
    }
}
