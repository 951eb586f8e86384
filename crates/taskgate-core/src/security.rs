// taskgate-core/src/security.rs
// ============================================================================
// Module: Taskgate Security Helpers
// Description: Runtime path guardrails and secret redaction.
// Purpose: Keep every durable write confined to an allowed runtime root, and
// keep secrets out of persisted audit/evidence payloads.
// Dependencies: serde_json, thiserror
// ============================================================================

//! ## Overview
//! Two independent concerns live here: [`assert_runtime_path`] rejects
//! attempts to write outside the runtime root, and [`redact_sensitive_payload`]
//! scrubs secret-shaped keys and inline `key=value` assignments before a
//! payload is logged or persisted as evidence.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Path Guard
// ============================================================================

/// Errors raised by [`assert_runtime_path`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathGuardError {
    /// The path was absolute.
    #[error("{label} must be relative (absolute paths are not allowed): {path}")]
    Absolute {
        /// Human-readable label for the rejected path's purpose.
        label: String,
        /// The rejected path, rendered for display.
        path: String,
    },
    /// The path contained a parent-directory traversal component.
    #[error("{label} must not contain parent traversal: {path}")]
    ParentTraversal {
        /// Human-readable label for the rejected path's purpose.
        label: String,
        /// The rejected path, rendered for display.
        path: String,
    },
    /// The path did not resolve under the allowed runtime root.
    #[error("{label} must resolve under the runtime root: {path}")]
    OutsideRoot {
        /// Human-readable label for the rejected path's purpose.
        label: String,
        /// The rejected path, rendered for display.
        path: String,
    },
}

/// Rejects absolute paths, parent traversal, and paths that do not resolve
/// under `<root>/ops/runtime`. Returns the (unmodified) relative path when it
/// is acceptable.
///
/// # Errors
///
/// Returns [`PathGuardError`] describing why the path was rejected.
pub fn assert_runtime_path<'a>(
    path: &'a Path,
    root: &Path,
    label: &str,
) -> Result<&'a Path, PathGuardError> {
    if path.is_absolute() {
        return Err(PathGuardError::Absolute {
            label: label.to_string(),
            path: path.display().to_string(),
        });
    }
    if path.components().any(|component| component == Component::ParentDir) {
        return Err(PathGuardError::ParentTraversal {
            label: label.to_string(),
            path: path.display().to_string(),
        });
    }
    let allowed_root = normalize(&root.join("ops").join("runtime"));
    let resolved = normalize(&root.join(path));
    if resolved != allowed_root && !resolved.starts_with(&allowed_root) {
        return Err(PathGuardError::OutsideRoot {
            label: label.to_string(),
            path: path.display().to_string(),
        });
    }
    Ok(path)
}

/// Lexically normalizes a path without touching the filesystem (the runtime
/// root need not exist yet when this guard runs).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ============================================================================
// SECTION: Secret Redaction
// ============================================================================

/// Substring tokens that mark a JSON key as sensitive (case-insensitive).
const SENSITIVE_KEY_TOKENS: [&str; 6] =
    ["secret", "token", "password", "api_key", "apikey", "credential"];

/// Keyword prefixes recognized by the inline `key=value` / `key: value`
/// scrubber, matching the original's regex patterns without pulling in a
/// `regex` dependency the pack does not carry for this purpose.
const ASSIGNMENT_KEYWORDS: [&str; 5] = ["api_key", "api-key", "token", "password", "secret"];

const REDACTED: &str = "[REDACTED]";

/// Returns true when `key` contains one of the sensitive tokens.
#[must_use]
pub fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SENSITIVE_KEY_TOKENS.iter().any(|token| lowered.contains(token))
}

/// Scrubs inline `keyword=value` / `keyword: value` assignments in free text,
/// replacing the value with `[REDACTED]` while leaving the keyword in place.
#[must_use]
pub fn redact_sensitive_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut i = 0;
    'outer: while i < bytes.len() {
        for keyword in ASSIGNMENT_KEYWORDS {
            if matches_keyword_ci(&value[i..], keyword) {
                let after_keyword = i + keyword.len();
                if let Some((sep_end, value_end)) = find_assignment(value, after_keyword) {
                    out.push_str(&value[i..sep_end]);
                    out.push_str(REDACTED);
                    i = value_end;
                    continue 'outer;
                }
            }
        }
        let ch = value[i..].chars().next().unwrap_or('\u{0}');
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Returns true when `text` starts with `keyword`, case-insensitively.
fn matches_keyword_ci(text: &str, keyword: &str) -> bool {
    text.len() >= keyword.len() && text[..keyword.len()].eq_ignore_ascii_case(keyword)
}

/// Given the end of a keyword match, finds an optional run of whitespace
/// followed by `=` or `:`, then whitespace, then a value terminated by
/// whitespace, comma, or semicolon. Returns `(separator_end, value_end)`
/// offsets into `text` when the pattern matches.
fn find_assignment(text: &str, keyword_end: usize) -> Option<(usize, usize)> {
    let rest = &text[keyword_end..];
    let trimmed = rest.trim_start_matches([' ', '\t']);
    let skipped = rest.len() - trimmed.len();
    let mut chars = trimmed.chars();
    let sep = chars.next()?;
    if sep != '=' && sep != ':' {
        return None;
    }
    let after_sep = keyword_end + skipped + sep.len_utf8();
    let after_sep_rest = &text[after_sep..];
    let value_start_trimmed = after_sep_rest.trim_start_matches(' ');
    let value_start = after_sep + (after_sep_rest.len() - value_start_trimmed.len());
    let value_end = text[value_start..]
        .find([' ', '\t', ',', ';'])
        .map_or(text.len(), |offset| value_start + offset);
    if value_end == value_start {
        return None;
    }
    Some((value_start, value_end))
}

/// Recursively redacts a JSON value: sensitive keys become `"[REDACTED]"`,
/// string values are scrubbed with [`redact_sensitive_text`], and arrays and
/// objects are walked in place.
#[must_use]
pub fn redact_sensitive_payload(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, node) in map {
                if is_sensitive_key(key) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), redact_sensitive_payload(node));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_payload).collect()),
        Value::String(text) => Value::String(redact_sensitive_text(text)),
        other => other.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use std::path::Path;
    use std::path::PathBuf;

    use serde_json::json;

    use super::PathGuardError;
    use super::assert_runtime_path;
    use super::redact_sensitive_payload;
    use super::redact_sensitive_text;

    fn root() -> PathBuf {
        PathBuf::from("/repo")
    }

    #[test]
    fn rejects_absolute_path() {
        let err = assert_runtime_path(Path::new("/etc/passwd"), &root(), "artifact path").unwrap_err();
        assert!(matches!(err, PathGuardError::Absolute { .. }));
    }

    #[test]
    fn rejects_parent_traversal() {
        let err =
            assert_runtime_path(Path::new("ops/runtime/../../secrets"), &root(), "artifact path")
                .unwrap_err();
        assert!(matches!(err, PathGuardError::ParentTraversal { .. }));
    }

    #[test]
    fn rejects_path_outside_runtime_root() {
        let err = assert_runtime_path(Path::new("ops/other/file.json"), &root(), "artifact path")
            .unwrap_err();
        assert!(matches!(err, PathGuardError::OutsideRoot { .. }));
    }

    #[test]
    fn accepts_path_under_runtime_root() {
        let path = Path::new("ops/runtime/run-1/state.space.json");
        assert_eq!(assert_runtime_path(path, &root(), "artifact path").unwrap(), path);
    }

    #[test]
    fn redacts_sensitive_keys() {
        let payload = json!({"api_key": "sk-live-123", "nested": {"password": "hunter2"}, "ok": "fine"});
        let redacted = redact_sensitive_payload(&payload);
        assert_eq!(redacted["api_key"], json!("[REDACTED]"));
        assert_eq!(redacted["nested"]["password"], json!("[REDACTED]"));
        assert_eq!(redacted["ok"], json!("fine"));
    }

    #[test]
    fn scrubs_inline_assignments_in_text() {
        let text = "connecting with token=abc123, retrying";
        assert_eq!(redact_sensitive_text(text), "connecting with token=[REDACTED], retrying");
    }
}
