//! Read-only query gate and result masking.
//!
//! A query must start with a read-only statement keyword and must not contain
//! any statement keyword with side effects, anywhere, as a whole word. The
//! check runs before a connection is acquired.
//!
//! Result columns whose names contain a sensitive fragment have every
//! non-null value replaced by [`REDACTED`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};

/// Replacement for every masked value, regardless of the original's type or
/// length.
pub const REDACTED: &str = "********";

/// Statement keywords a query may start with.
pub const ALLOWED_PREFIXES: &[&str] = &["SELECT", "WITH", "EXPLAIN", "DESCRIBE", "DESC"];

/// Keywords that reject a query wherever they appear as a whole word.
pub const DENIED_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "GRANT", "REVOKE",
    "EXEC", "EXECUTE", "ATTACH", "DETACH", "PRAGMA", "VACUUM",
];

/// Column-name fragments that mark a column as sensitive.
pub const SENSITIVE_FRAGMENTS: &[&str] = &[
    "password", "ssn", "social", "credit", "card", "token", "secret", "key", "pin",
];

static ALLOWED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)^\s*(?:{})\b", ALLOWED_PREFIXES.join("|"))).expect("valid regex")
});

static DENIED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b(?:{})\b", DENIED_KEYWORDS.join("|"))).expect("valid regex")
});

/// Accept or reject a query for the read-only path.
pub fn validate_query(query: &str) -> Result<()> {
    if !ALLOWED.is_match(query) {
        return Err(Error::QueryRejected(format!(
            "only {} statements are allowed",
            ALLOWED_PREFIXES.join("/")
        )));
    }
    if let Some(found) = DENIED.find(query) {
        return Err(Error::QueryRejected(format!(
            "forbidden keyword '{}'",
            found.as_str().to_uppercase()
        )));
    }
    Ok(())
}

pub fn is_sensitive(column: &str) -> bool {
    let lower = column.to_lowercase();
    SENSITIVE_FRAGMENTS.iter().any(|f| lower.contains(f))
}

/// Redact sensitive columns in place. NULLs are left as NULL.
pub fn mask_rows(columns: &[String], rows: &mut [Vec<Value>]) {
    let sensitive: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, name)| is_sensitive(name))
        .map(|(idx, _)| idx)
        .collect();
    if sensitive.is_empty() {
        return;
    }
    for row in rows.iter_mut() {
        for &idx in &sensitive {
            if let Some(value) = row.get_mut(idx) {
                if !value.is_null() {
                    *value = Value::String(REDACTED.to_string());
                }
            }
        }
    }
}
