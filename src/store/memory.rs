//! In-memory [`ContextStore`] for tests and embedders.
//!
//! Holds the same encoded records a file store would write, so a round trip
//! through this store exercises the record codec too.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::Result;
use crate::models::WorkflowContext;
use crate::record;

use super::{validate_context_id, ContextStore};

#[derive(Default)]
pub struct MemoryContextStore {
    records: RwLock<BTreeMap<String, String>>,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw encoded record, as it would appear on disk.
    pub async fn raw(&self, context_id: &str) -> Option<String> {
        self.records.read().await.get(context_id).cloned()
    }

    /// Store an already encoded record verbatim.
    pub async fn insert_raw(&self, context_id: &str, raw: String) {
        self.records.write().await.insert(context_id.to_string(), raw);
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn save(&self, ctx: &WorkflowContext) -> Result<()> {
        validate_context_id(&ctx.context_id)?;
        let encoded = record::encode_context(ctx)?;
        self.records
            .write()
            .await
            .insert(ctx.context_id.clone(), encoded);
        Ok(())
    }

    async fn load(&self, context_id: &str) -> Result<Option<WorkflowContext>> {
        validate_context_id(context_id)?;
        match self.records.read().await.get(context_id) {
            Some(raw) => Ok(Some(record::decode_context(raw)?)),
            None => Ok(None),
        }
    }

    async fn load_all(&self) -> Result<Vec<WorkflowContext>> {
        let records = self.records.read().await;
        let mut contexts = Vec::with_capacity(records.len());
        for (id, raw) in records.iter() {
            match record::decode_context(raw) {
                Ok(ctx) => contexts.push(ctx),
                Err(e) => warn!(context_id = %id, error = %e, "skipping context record"),
            }
        }
        Ok(contexts)
    }

    async fn delete(&self, context_id: &str) -> Result<bool> {
        validate_context_id(context_id)?;
        Ok(self.records.write().await.remove(context_id).is_some())
    }
}
