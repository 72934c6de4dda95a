//! Durable storage for workflow contexts.
//!
//! The [`ContextStore`] trait is the seam between the context manager and
//! wherever contexts live. Records are always written in the versioned
//! envelope from [`crate::record`], whatever the backend.
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`FileContextStore`] | One `<context_id>.json` document per context in a directory |
//! | [`MemoryContextStore`] | Encoded records in a map; tests and embedders |

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::WorkflowContext;

pub use file::FileContextStore;
pub use memory::MemoryContextStore;

/// Storage backend for [`WorkflowContext`] records, keyed by context id.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Insert or fully overwrite the record for `ctx.context_id`.
    async fn save(&self, ctx: &WorkflowContext) -> Result<()>;

    /// Load one record. A missing record is `Ok(None)`.
    async fn load(&self, context_id: &str) -> Result<Option<WorkflowContext>>;

    /// Load every decodable record, ordered by context id. Records that fail
    /// to decode are logged and skipped.
    async fn load_all(&self) -> Result<Vec<WorkflowContext>>;

    /// Remove a record. Returns whether one existed.
    async fn delete(&self, context_id: &str) -> Result<bool>;
}

/// Context ids double as file names: non-empty, `[A-Za-z0-9._-]` only, and
/// not starting with a dot.
pub fn validate_context_id(context_id: &str) -> Result<()> {
    let well_formed = !context_id.is_empty()
        && !context_id.starts_with('.')
        && context_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if well_formed {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "malformed context id '{}'",
            context_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_context_id() {
        assert!(validate_context_id("ctx_PROJ-12_1772366400000").is_ok());
        assert!(validate_context_id("").is_err());
        assert!(validate_context_id("../etc/passwd").is_err());
        assert!(validate_context_id(".hidden").is_err());
        assert!(validate_context_id("a/b").is_err());
    }
}
