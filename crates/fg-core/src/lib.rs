// SPDX-License-Identifier: MIT OR Apache-2.0
//! fg-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Stable domain types for the function gateway: function identifiers,
//! versions, metadata, code artifacts, and credential records.
//!
//! If you only take one dependency, take this one.

/// Validation for function ids, versions, entry points, and dependencies.
pub mod validate;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

pub use validate::ValidationError;

// ---------------------------------------------------------------------------
// FunctionId
// ---------------------------------------------------------------------------

/// Maximum length (in bytes) of a [`FunctionId`].
pub const FUNCTION_ID_MAX_LEN: usize = 64;

/// A short, validated identifier naming a user-owned function.
///
/// Matches `^[A-Za-z0-9][A-Za-z0-9_-]*$`, 1–64 characters. Constructing a
/// `FunctionId` is the only way to obtain one, so a `FunctionId` already in
/// hand is always well-formed — illegal states are unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "String", into = "String")]
pub struct FunctionId(String);

impl FunctionId {
    /// Parse and validate a raw string into a [`FunctionId`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if `raw` does not match the id grammar.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        validate::validate_function_id(&raw)?;
        Ok(Self(raw))
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FunctionId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<FunctionId> for String {
    fn from(value: FunctionId) -> Self {
        value.0
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// A semantic version `MAJOR.MINOR.PATCH`, with an optional
/// `-<pre-release>`/`+<build>` suffix preserved verbatim.
///
/// `(id, version)` pairs are immutable once written to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    raw: String,
    major: u64,
    minor: u64,
    patch: u64,
}

impl Version {
    /// Parse and validate a semver string.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if `raw` is not `MAJOR.MINOR.PATCH`
    /// (with an optional pre-release/build suffix).
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        let (major, minor, patch) = validate::parse_semver_core(&raw)?;
        Ok(Self {
            raw,
            major,
            minor,
            patch,
        })
    }

    /// The full version string as originally supplied.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The `MAJOR` component.
    #[must_use]
    pub fn major(&self) -> u64 {
        self.major
    }

    /// The `MINOR` component.
    #[must_use]
    pub fn minor(&self) -> u64 {
        self.minor
    }

    /// The `PATCH` component.
    #[must_use]
    pub fn patch(&self) -> u64 {
        self.patch
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for Version {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.raw
    }
}

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// The closed set of source languages a function may be deployed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// TypeScript, normalized (type-stripped) before storage.
    Typescript,
    /// Plain JavaScript, stored as-is.
    Javascript,
    /// Rust, compiled to WebAssembly.
    Rust,
    /// Go, compiled to WebAssembly.
    Go,
    /// Python, stored as source; compilation is not defined.
    Python,
    /// C#, stored as source; compilation is not defined.
    Csharp,
    /// Zig, compiled to WebAssembly.
    Zig,
    /// AssemblyScript, compiled to WebAssembly.
    Assemblyscript,
}

impl Language {
    /// Whether this language requires a compilation step before execution.
    #[must_use]
    pub fn requires_compilation(&self) -> bool {
        matches!(
            self,
            Self::Typescript | Self::Rust | Self::Go | Self::Zig | Self::Assemblyscript
        )
    }

    /// Whether this language's artifact is binary (base64-encoded at rest).
    #[must_use]
    pub fn produces_binary_artifact(&self) -> bool {
        matches!(self, Self::Rust | Self::Go | Self::Zig | Self::Assemblyscript)
    }

    /// The default entry-point filename when a deploy omits one.
    #[must_use]
    pub fn default_entry_point(&self) -> &'static str {
        match self {
            Self::Typescript => "index.ts",
            Self::Javascript => "index.js",
            _ => "main",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Typescript => "typescript",
            Self::Javascript => "javascript",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Python => "python",
            Self::Csharp => "csharp",
            Self::Zig => "zig",
            Self::Assemblyscript => "assemblyscript",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// FunctionMetadata
// ---------------------------------------------------------------------------

/// A versioned function's metadata, as stored by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FunctionMetadata {
    /// The function identifier.
    pub id: FunctionId,
    /// The deployed version.
    pub version: Version,
    /// Source language.
    pub language: Language,
    /// Relative path to the entry point, validated as a safe filename.
    pub entry_point: String,
    /// Dependency name to version-constraint mapping. Values are never null.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    /// When this `(id, version)` was first written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// When the latest pointer for `id` was last updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional author identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl FunctionMetadata {
    /// Validate this metadata's invariants (id/version/entryPoint/dependencies).
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate::validate_entry_point(self.language, &self.entry_point)?;
        validate::validate_dependencies(&self.dependencies)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CodeArtifact
// ---------------------------------------------------------------------------

/// The stored form of a function's code: either source text, or an opaque
/// binary blob (base64-encoded at rest — "base64 means binary").
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CodeArtifact {
    /// Text source, run directly by the sandbox.
    Source {
        /// UTF-8 source text.
        text: String,
    },
    /// An opaque compiled blob, stored as base64 text.
    Binary {
        /// Base64-encoded bytes.
        base64: String,
    },
}

impl CodeArtifact {
    /// Size in bytes of the artifact as it would be stored at rest.
    #[must_use]
    pub fn stored_size(&self) -> usize {
        match self {
            Self::Source { text } => text.len(),
            Self::Binary { base64 } => base64.len(),
        }
    }

    /// `true` if this is a [`CodeArtifact::Binary`] artifact.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary { .. })
    }
}

// ---------------------------------------------------------------------------
// CredentialRecord
// ---------------------------------------------------------------------------

/// A credential record as stored by the credential store, keyed by
/// `keys:<sha256-hex(raw key)>`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CredentialRecord {
    /// Optional owning user identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Whether this key is currently usable.
    pub active: bool,
    /// Optional expiry; a key past this time is rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Optional scopes granted to this key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    /// When set, this key may only be used for the named function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_id: Option<FunctionId>,
}

impl CredentialRecord {
    /// `true` if `expires_at` is present and strictly before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }
}

/// Compute the credential store lookup key for a presented raw API key:
/// `keys:` followed by the lowercase hex SHA-256 digest of its UTF-8 bytes.
///
/// The raw key itself is never stored or logged.
#[must_use]
pub fn credential_key(raw_key: &str) -> String {
    let digest = Sha256::digest(raw_key.as_bytes());
    let mut out = String::with_capacity(5 + digest.len() * 2);
    out.push_str("keys:");
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

// ---------------------------------------------------------------------------
// Rate-limit window state
// ---------------------------------------------------------------------------

/// Per-`(category, key)` fixed-duration window state: a request count and
/// the wall-clock millisecond timestamp at which the window resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    /// Requests consumed so far in the current window.
    pub count: u32,
    /// Wall-clock millisecond timestamp when the window resets.
    pub reset_at_ms: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
