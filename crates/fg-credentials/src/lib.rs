// SPDX-License-Identifier: MIT OR Apache-2.0
//! API-key authentication against the credential store (spec §4.1).
//!
//! Looks up, verifies, and characterizes API keys. Lookups are read-only —
//! this crate has no observable side effects beyond the `KvStore` reads it
//! issues.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::Utc;
use fg_core::{credential_key, CredentialRecord, FunctionId};
use fg_kv::KvStore;
use std::sync::Arc;

/// Default public paths, always exempt from authentication regardless of
/// configuration.
pub const DEFAULT_PUBLIC_PATHS: &[&str] = &["/", "/health"];

/// Why authentication failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    /// No credential was presented on a non-public endpoint.
    #[error("missing")]
    Missing,
    /// The hashed lookup found no matching record.
    #[error("unknown")]
    Unknown,
    /// The record exists but `active` is `false`.
    #[error("inactive")]
    Inactive,
    /// The record's `expiresAt` is present and in the past.
    #[error("expired")]
    Expired,
}

/// The caller identity and grants attached to a successfully verified key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    /// The credential's owning user, if recorded.
    pub user_id: Option<String>,
    /// Scopes granted to this key, if recorded.
    pub scopes: Option<Vec<String>>,
    /// When set, this key may only be used to invoke this function.
    pub function_id: Option<FunctionId>,
}

/// Looks up, verifies, and characterizes API keys against a [`KvStore`].
pub struct CredentialStore<K: KvStore> {
    kv: Arc<K>,
}

impl<K: KvStore> CredentialStore<K> {
    /// Construct a credential store fronting `kv`.
    #[must_use]
    pub fn new(kv: Arc<K>) -> Self {
        Self { kv }
    }

    /// Verify a presented raw API key.
    ///
    /// Computes the SHA-256 hex digest of `presented_key`'s UTF-8 bytes,
    /// prefixed `keys:`, and looks up the record. The raw key is never
    /// stored or logged.
    pub async fn verify(&self, presented_key: &str) -> Result<Authenticated, AuthFailure> {
        if presented_key.is_empty() {
            return Err(AuthFailure::Missing);
        }

        let key = credential_key(presented_key);
        let raw = self
            .kv
            .get(&key)
            .await
            .ok()
            .flatten()
            .ok_or(AuthFailure::Unknown)?;
        let record: CredentialRecord =
            serde_json::from_str(&raw).map_err(|_| AuthFailure::Unknown)?;

        if !record.active {
            return Err(AuthFailure::Inactive);
        }
        if record.is_expired_at(Utc::now()) {
            return Err(AuthFailure::Expired);
        }

        Ok(Authenticated {
            user_id: record.user_id,
            scopes: record.scopes,
            function_id: record.function_id,
        })
    }

    /// Store a credential record directly, keyed by the hash of `raw_key`.
    ///
    /// A convenience for tests and administrative provisioning; production
    /// key issuance is outside this crate's scope.
    pub async fn put_for_test(&self, raw_key: &str, record: &CredentialRecord) {
        let key = credential_key(raw_key);
        let body = serde_json::to_string(record).expect("CredentialRecord always serializes");
        let _ = self.kv.put(&key, body).await;
    }
}

/// Extract a presented raw API key from request headers.
///
/// Two forms are recognised, in order: `X-API-Key: <key>` and
/// `Authorization: Bearer <key>`. `lookup` should perform a
/// case-insensitive header lookup; returns `None` if neither is present.
pub fn extract_presented_key(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    if let Some(key) = lookup("X-API-Key") {
        if !key.is_empty() {
            return Some(key);
        }
    }
    if let Some(header) = lookup("Authorization") {
        if let Some(token) = header.strip_prefix("Bearer ") {
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    None
}

/// Is `path` exempt from authentication and rate limiting?
///
/// Matches against the static [`DEFAULT_PUBLIC_PATHS`] plus
/// `configured_public_paths`. A configured pattern ending in `*` matches
/// any path sharing that prefix.
#[must_use]
pub fn is_public(path: &str, configured_public_paths: &[String]) -> bool {
    if DEFAULT_PUBLIC_PATHS.contains(&path) {
        return true;
    }
    configured_public_paths.iter().any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix('*') {
            path.starts_with(prefix)
        } else {
            path == pattern
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
