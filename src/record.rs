//! Versioned on-disk record format.
//!
//! Every durable document is a JSON envelope:
//!
//! ```json
//! { "kind": "workflow_context", "version": 1, "data": { ... } }
//! ```
//!
//! Each persisted entity has its own encode/decode pair so the on-disk shape
//! is isolated from the in-memory type. Decoding checks the envelope before
//! touching `data` and rejects foreign kinds and unknown versions with
//! [`Error::Format`].
//!
//! All maps in the persisted models are `BTreeMap`s, so encoding the same
//! value twice yields the same bytes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::models::{RepositoryInfo, SchemaAnalysis, WorkflowContext};

pub const FORMAT_VERSION: u32 = 1;

pub const KIND_WORKFLOW_CONTEXT: &str = "workflow_context";
pub const KIND_REPOSITORY_CACHE: &str = "repository_cache";
pub const KIND_SCHEMA_ANALYSIS: &str = "schema_analysis";

#[derive(Serialize)]
struct EnvelopeOut<'a, T> {
    kind: &'a str,
    version: u32,
    data: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    kind: String,
    version: u32,
    data: serde_json::Value,
}

fn encode<T: Serialize>(kind: &str, data: &T) -> Result<String> {
    let envelope = EnvelopeOut {
        kind,
        version: FORMAT_VERSION,
        data,
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

fn decode<T: DeserializeOwned>(kind: &str, raw: &str) -> Result<T> {
    let envelope: EnvelopeIn = serde_json::from_str(raw)?;
    if envelope.kind != kind {
        return Err(Error::Format(format!(
            "expected record kind '{}', found '{}'",
            kind, envelope.kind
        )));
    }
    if envelope.version != FORMAT_VERSION {
        return Err(Error::Format(format!(
            "unsupported {} record version {} (expected {})",
            kind, envelope.version, FORMAT_VERSION
        )));
    }
    Ok(serde_json::from_value(envelope.data)?)
}

pub fn encode_context(ctx: &WorkflowContext) -> Result<String> {
    encode(KIND_WORKFLOW_CONTEXT, ctx)
}

pub fn decode_context(raw: &str) -> Result<WorkflowContext> {
    decode(KIND_WORKFLOW_CONTEXT, raw)
}

/// Repository cache: absolute repository path to its latest scan.
pub fn encode_repository_cache(cache: &BTreeMap<String, RepositoryInfo>) -> Result<String> {
    encode(KIND_REPOSITORY_CACHE, cache)
}

pub fn decode_repository_cache(raw: &str) -> Result<BTreeMap<String, RepositoryInfo>> {
    decode(KIND_REPOSITORY_CACHE, raw)
}

pub fn encode_schema_analysis(analysis: &SchemaAnalysis) -> Result<String> {
    encode(KIND_SCHEMA_ANALYSIS, analysis)
}

pub fn decode_schema_analysis(raw: &str) -> Result<SchemaAnalysis> {
    decode(KIND_SCHEMA_ANALYSIS, raw)
}

/// Write `contents` to `path` through a sibling temporary file and a rename,
/// so readers never observe a half-written record.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
