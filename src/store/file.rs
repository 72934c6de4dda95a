//! Directory-backed [`ContextStore`].
//!
//! Each context is one `<context_id>.json` document. Saves go through a
//! temporary file and a rename.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Result;
use crate::models::WorkflowContext;
use crate::record;

use super::{validate_context_id, ContextStore};

pub struct FileContextStore {
    dir: PathBuf,
}

impl FileContextStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of a context's document. The id must already be validated.
    pub fn path_for(&self, context_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", context_id))
    }
}

#[async_trait]
impl ContextStore for FileContextStore {
    async fn save(&self, ctx: &WorkflowContext) -> Result<()> {
        validate_context_id(&ctx.context_id)?;
        let encoded = record::encode_context(ctx)?;
        record::write_atomic(&self.path_for(&ctx.context_id), &encoded).await
    }

    async fn load(&self, context_id: &str) -> Result<Option<WorkflowContext>> {
        validate_context_id(context_id)?;
        match tokio::fs::read_to_string(self.path_for(context_id)).await {
            Ok(raw) => Ok(Some(record::decode_context(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_all(&self) -> Result<Vec<WorkflowContext>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut contexts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let decoded = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => record::decode_context(&raw),
                Err(e) => Err(e.into()),
            };
            match decoded {
                Ok(ctx) => contexts.push(ctx),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping context record"),
            }
        }

        contexts.sort_by(|a, b| a.context_id.cmp(&b.context_id));
        Ok(contexts)
    }

    async fn delete(&self, context_id: &str) -> Result<bool> {
        validate_context_id(context_id)?;
        match tokio::fs::remove_file(self.path_for(context_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
