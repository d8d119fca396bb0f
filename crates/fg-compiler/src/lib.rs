// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-language compilation dispatch for deployed function source (spec §4.5).
//!
//! TypeScript is normalized with a regex-based type-annotation strip — a
//! deliberately narrow fallback, not a type checker. Rust/Go/Zig/
//! AssemblyScript are handed to an injectable [`WasmCompiler`]; the actual
//! toolchains are out-of-scope collaborators the deployment wires in.
//! JavaScript, Python, and C# are stored verbatim; compilation is not
//! defined for them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use fg_core::{CodeArtifact, Language};
use regex::Regex;
use std::sync::LazyLock;

/// The result of dispatching a function's source through [`compile`].
#[derive(Debug, Clone)]
pub struct CompileOutput {
    /// The artifact to persist as the execution target.
    pub artifact: CodeArtifact,
    /// `true` if a compilation step actually ran (as opposed to passthrough storage).
    pub compiled: bool,
    /// When compilation completed, if `compiled` is `true`.
    pub compiled_at: Option<DateTime<Utc>>,
    /// Non-fatal notices (e.g. unsupported TypeScript constructs skipped over).
    pub warnings: Vec<String>,
    /// A source map, when the compilation step produces one.
    pub source_map: Option<String>,
    /// Size in bytes of the original source.
    pub source_size: usize,
    /// Size in bytes of the stored artifact.
    pub compiled_size: usize,
}

/// Failure modes for [`compile`].
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The source failed to compile.
    #[error("{message}")]
    Syntax {
        /// Human-readable diagnostic.
        message: String,
        /// 1-based line, if the failing backend reported one.
        line: Option<u32>,
        /// 1-based column, if the failing backend reported one.
        column: Option<u32>,
    },
    /// No [`WasmCompiler`] was configured for a language that requires one.
    #[error("no wasm compiler configured for {0}")]
    NoBackend(Language),
}

/// A pluggable backend that turns `language` source text into Wasm bytes.
///
/// Implementers provide one adapter per toolchain; this crate is agnostic to
/// how compilation actually happens.
pub trait WasmCompiler: Send + Sync {
    /// Compile `source` written in `language`, returning the Wasm module bytes.
    ///
    /// # Errors
    ///
    /// Returns [`WasmCompileError`] with as much diagnostic detail as the
    /// underlying toolchain reports.
    fn compile(&self, language: Language, source: &str) -> Result<Vec<u8>, WasmCompileError>;
}

/// A compilation failure reported by a [`WasmCompiler`] backend.
#[derive(Debug, Clone)]
pub struct WasmCompileError {
    /// Human-readable diagnostic.
    pub message: String,
    /// 1-based line, if known.
    pub line: Option<u32>,
    /// 1-based column, if known.
    pub column: Option<u32>,
}

/// Dispatch `source` (written in `language`) through the appropriate
/// compilation policy.
///
/// `wasm` is consulted only for languages where
/// [`Language::requires_compilation`] is `true` and
/// [`Language::produces_binary_artifact`] is also `true` (Rust/Go/Zig/
/// AssemblyScript). TypeScript is handled in-process via a regex strip and
/// never touches `wasm`.
///
/// # Errors
///
/// Returns [`CompileError::Syntax`] if compilation fails, or
/// [`CompileError::NoBackend`] if `wasm` is `None` for a language that needs
/// one.
pub fn compile(
    language: Language,
    source: &str,
    wasm: Option<&dyn WasmCompiler>,
) -> Result<CompileOutput, CompileError> {
    let source_size = source.len();
    match language {
        Language::Typescript => {
            let (stripped, warnings) = strip_type_annotations(source);
            let compiled_size = stripped.len();
            Ok(CompileOutput {
                artifact: CodeArtifact::Source { text: stripped },
                compiled: true,
                compiled_at: Some(Utc::now()),
                warnings,
                source_map: None,
                source_size,
                compiled_size,
            })
        }
        Language::Javascript | Language::Python | Language::Csharp => Ok(CompileOutput {
            artifact: CodeArtifact::Source {
                text: source.to_string(),
            },
            compiled: false,
            compiled_at: None,
            warnings: Vec::new(),
            source_map: None,
            source_size,
            compiled_size: source_size,
        }),
        Language::Rust | Language::Go | Language::Zig | Language::Assemblyscript => {
            let backend = wasm.ok_or(CompileError::NoBackend(language))?;
            let bytes = backend.compile(language, source).map_err(|e| CompileError::Syntax {
                message: e.message,
                line: e.line,
                column: e.column,
            })?;
            let encoded = base64_encode(&bytes);
            let compiled_size = encoded.len();
            Ok(CompileOutput {
                artifact: CodeArtifact::Binary { base64: encoded },
                compiled: true,
                compiled_at: Some(Utc::now()),
                warnings: Vec::new(),
                source_map: None,
                source_size,
                compiled_size,
            })
        }
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

// ---------------------------------------------------------------------------
// TypeScript type-annotation strip
// ---------------------------------------------------------------------------

// Order matters: interfaces/type-aliases/`declare` blocks are dropped whole
// before the narrower per-token passes run, otherwise their bodies would be
// mangled by the annotation and generic strips below.
static INTERFACE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\b(export\s+)?interface\s+\w+(\s*<[^>{]*>)?\s*(extends\s+[^{]+)?\{[^{}]*\}").unwrap());
static TYPE_ALIAS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*(export\s+)?type\s+\w+(\s*<[^>]*>)?\s*=.*;\s*$").unwrap());
static DECLARE_STATEMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*declare\s+.*;\s*$").unwrap());
static PARAM_ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\s*[A-Za-z_][\w.<>\[\]|&,\s]*(?=[,)=;\n])").unwrap());
static RETURN_ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\)\s*:\s*[A-Za-z_][\w.<>\[\]|&,\s]*(?=\s*\{|\s*=>)").unwrap());
static AS_CAST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+as\s+[A-Za-z_][\w.<>\[\]]*").unwrap());
static NON_NULL_ASSERTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\w)!(?=[.\s;,)\n])").unwrap());
static GENERIC_ENUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\benum\b").unwrap());
static NAMESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bnamespace\b").unwrap());
static DECORATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*@\w+").unwrap());

/// Strip TypeScript type annotations with a best-effort regex pass, and
/// report the unsupported constructs it passed through unchanged.
///
/// This is not a type checker: it does not parse the source into an AST,
/// so it can be fooled by type annotations embedded in string/template
/// literals or comments. `enum`, `namespace`, and decorator syntax are not
/// stripped at all — they are left in place and reported as warnings,
/// since the sandbox only understands plain JavaScript.
#[must_use]
pub fn strip_type_annotations(source: &str) -> (String, Vec<String>) {
    let mut warnings = Vec::new();
    if GENERIC_ENUM.is_match(source) {
        warnings.push("enum declarations are not supported by the type-strip fallback".to_string());
    }
    if NAMESPACE.is_match(source) {
        warnings.push("namespace declarations are not supported by the type-strip fallback".to_string());
    }
    if DECORATOR.is_match(source) {
        warnings.push("decorators are not supported by the type-strip fallback".to_string());
    }

    let mut out = source.to_string();
    out = INTERFACE_BLOCK.replace_all(&out, "").to_string();
    out = TYPE_ALIAS.replace_all(&out, "").to_string();
    out = DECLARE_STATEMENT.replace_all(&out, "").to_string();
    out = RETURN_ANNOTATION.replace_all(&out, ")").to_string();
    out = PARAM_ANNOTATION.replace_all(&out, "").to_string();
    out = AS_CAST.replace_all(&out, "").to_string();
    out = NON_NULL_ASSERTION.replace_all(&out, "$1").to_string();
    (out, warnings)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
