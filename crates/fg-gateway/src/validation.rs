// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transport-layer body guardrails for the gateway's HTTP API.
//!
//! `fg-deploy` and `fg-orchestrator` already enforce the domain invariants
//! (id/version/language/entryPoint/dependencies, JSON body shape); this
//! module runs *before* those parsers see the bytes, rejecting payloads
//! that are technically valid JSON but abusively large or deeply nested,
//! the same guardrail `fg-json-guard` applies to configuration files.

use fg_json_guard::{validate_json_object, JsonGuardLimits};
use serde_json::Value;

/// Depth/size limits applied to inbound deploy request bodies.
pub const DEPLOY_BODY_LIMITS: JsonGuardLimits = JsonGuardLimits::new(32, 2_000_000);

/// Check `raw` against [`DEPLOY_BODY_LIMITS`].
///
/// Malformed JSON is deliberately let through here — `fg-deploy::deploy`
/// reports that failure with its own `"Invalid JSON"` message, and this
/// guard would otherwise produce a confusing double error. Returns the
/// list of violated limits; empty means the payload passed.
#[must_use]
pub fn guard_deploy_body(raw: &[u8]) -> Vec<String> {
    let Ok(value) = serde_json::from_slice::<Value>(raw) else {
        return Vec::new();
    };
    validate_json_object(&value, DEPLOY_BODY_LIMITS)
}
