// SPDX-License-Identifier: MIT OR Apache-2.0
//! Validation for function ids, versions, entry points, and dependency maps.

use crate::{Language, FUNCTION_ID_MAX_LEN};
use std::collections::BTreeMap;
use std::fmt;

/// A single validation failure: the offending field and why it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the field that failed, e.g. `"entryPoint"`.
    pub field: String,
    /// Human-readable reason.
    pub reason: String,
}

impl ValidationError {
    /// Construct a new error for `field` with the given `reason`.
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a raw function id against `^[A-Za-z0-9][A-Za-z0-9_-]*$`, 1–64 chars.
pub fn validate_function_id(raw: &str) -> Result<(), ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::new("id", "must not be empty"));
    }
    if raw.len() > FUNCTION_ID_MAX_LEN {
        return Err(ValidationError::new(
            "id",
            format!("must be at most {FUNCTION_ID_MAX_LEN} characters"),
        ));
    }
    let mut chars = raw.chars();
    let first = chars.next().expect("non-empty checked above");
    if !first.is_ascii_alphanumeric() {
        return Err(ValidationError::new(
            "id",
            "must start with an ASCII letter or digit",
        ));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-')) {
        return Err(ValidationError::new(
            "id",
            format!("contains disallowed character '{bad}'"),
        ));
    }
    Ok(())
}

/// Parse the `MAJOR.MINOR.PATCH` core of a semver string, ignoring (but
/// accepting) any `-<pre-release>` or `+<build>` suffix.
pub fn parse_semver_core(raw: &str) -> Result<(u64, u64, u64), ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::new("version", "must not be empty"));
    }
    // Strip build metadata first (it may itself contain '-'), then pre-release.
    let core = raw.split('+').next().unwrap_or(raw);
    let core = core.split('-').next().unwrap_or(core);

    let mut parts = core.split('.');
    let major = parse_numeric_component(&mut parts, raw)?;
    let minor = parse_numeric_component(&mut parts, raw)?;
    let patch = parse_numeric_component(&mut parts, raw)?;
    if parts.next().is_some() {
        return Err(ValidationError::new(
            "version",
            format!("'{raw}' has too many dot-separated components"),
        ));
    }
    Ok((major, minor, patch))
}

fn parse_numeric_component(
    parts: &mut std::str::Split<'_, char>,
    raw: &str,
) -> Result<u64, ValidationError> {
    let part = parts
        .next()
        .ok_or_else(|| ValidationError::new("version", format!("'{raw}' is not MAJOR.MINOR.PATCH")))?;
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::new(
            "version",
            format!("'{raw}' has a non-numeric version component"),
        ));
    }
    part.parse::<u64>()
        .map_err(|_| ValidationError::new("version", format!("'{raw}' component overflows u64")))
}

/// Validate an entry-point path: relative, no `..` traversal, no absolute
/// prefix, and non-empty.
pub fn validate_entry_point(_language: Language, entry_point: &str) -> Result<(), ValidationError> {
    if entry_point.is_empty() {
        return Err(ValidationError::new("entryPoint", "must not be empty"));
    }
    if entry_point.starts_with('/') || entry_point.starts_with('\\') {
        return Err(ValidationError::new("entryPoint", "must be a relative path"));
    }
    if entry_point.split(['/', '\\']).any(|seg| seg == "..") {
        return Err(ValidationError::new(
            "entryPoint",
            "must not contain '..' path segments",
        ));
    }
    if entry_point.contains('\0') {
        return Err(ValidationError::new("entryPoint", "must not contain NUL bytes"));
    }
    Ok(())
}

/// Validate a dependency map: names non-empty, values non-empty (never null).
pub fn validate_dependencies(deps: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    for (name, constraint) in deps {
        if name.trim().is_empty() {
            return Err(ValidationError::new("dependencies", "dependency name must not be empty"));
        }
        if constraint.trim().is_empty() {
            return Err(ValidationError::new(
                "dependencies",
                format!("dependency '{name}' has an empty version constraint"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- validate_function_id ------------------------------------------------

    #[test]
    fn accepts_minimal_valid_id() {
        assert!(validate_function_id("a").is_ok());
    }

    #[test]
    fn rejects_empty_id() {
        assert!(validate_function_id("").is_err());
    }

    #[test]
    fn rejects_id_starting_with_underscore() {
        assert!(validate_function_id("_foo").is_err());
    }

    #[test]
    fn rejects_id_with_space() {
        assert!(validate_function_id("my func").is_err());
    }

    #[test]
    fn rejects_id_with_slash() {
        assert!(validate_function_id("my/func").is_err());
    }

    // -- parse_semver_core -----------------------------------------------------

    #[test]
    fn parses_basic_triplet() {
        assert_eq!(parse_semver_core("1.2.3").unwrap(), (1, 2, 3));
    }

    #[test]
    fn parses_zero_version() {
        assert_eq!(parse_semver_core("0.0.0").unwrap(), (0, 0, 0));
    }

    #[test]
    fn strips_prerelease_and_build() {
        assert_eq!(parse_semver_core("2.0.0-rc.1+exp.sha.abc").unwrap(), (2, 0, 0));
    }

    #[test]
    fn rejects_two_components() {
        assert!(parse_semver_core("1.2").is_err());
    }

    #[test]
    fn rejects_four_components() {
        assert!(parse_semver_core("1.2.3.4").is_err());
    }

    #[test]
    fn rejects_leading_zero_free_but_non_numeric() {
        assert!(parse_semver_core("1.x.3").is_err());
    }

    // -- validate_entry_point ------------------------------------------------

    #[test]
    fn accepts_simple_relative_path() {
        assert!(validate_entry_point(Language::Javascript, "index.js").is_ok());
    }

    #[test]
    fn rejects_absolute_path() {
        assert!(validate_entry_point(Language::Javascript, "/etc/passwd").is_err());
    }

    #[test]
    fn rejects_parent_traversal() {
        assert!(validate_entry_point(Language::Javascript, "../../etc/passwd").is_err());
    }

    #[test]
    fn rejects_empty_entry_point() {
        assert!(validate_entry_point(Language::Javascript, "").is_err());
    }

    // -- validate_dependencies -----------------------------------------------

    #[test]
    fn accepts_empty_dependency_map() {
        assert!(validate_dependencies(&BTreeMap::new()).is_ok());
    }

    #[test]
    fn rejects_empty_constraint() {
        let mut deps = BTreeMap::new();
        deps.insert("left-pad".to_string(), String::new());
        assert!(validate_dependencies(&deps).is_err());
    }

    #[test]
    fn accepts_well_formed_dependency() {
        let mut deps = BTreeMap::new();
        deps.insert("left-pad".to_string(), "^1.0.0".to_string());
        assert!(validate_dependencies(&deps).is_ok());
    }

    // -- property tests --------------------------------------------------------

    proptest::proptest! {
        #[test]
        fn valid_ids_never_panic(s in "[A-Za-z0-9][A-Za-z0-9_-]{0,63}") {
            assert!(validate_function_id(&s).is_ok());
        }

        #[test]
        fn semver_triplets_roundtrip(major in 0u64..1000, minor in 0u64..1000, patch in 0u64..1000) {
            let raw = format!("{major}.{minor}.{patch}");
            let parsed = parse_semver_core(&raw).unwrap();
            assert_eq!(parsed, (major, minor, patch));
        }
    }
}
