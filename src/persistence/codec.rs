//! Artifact codecs for cached execution contexts

use crate::core::{EngineError, ExecutionContext, PipelineId, StepType};
use crate::persistence::cache::CacheEntry;
use serde::{Deserialize, Serialize};

/// Current on-disk envelope version
pub const FORMAT_VERSION: u32 = 1;

/// Encodes and decodes cache entries
///
/// Encoding must be deterministic: the same entry always yields the same
/// bytes, so re-running an unchanged step leaves its artifact untouched.
pub trait ArtifactCodec: Send + Sync {
    /// File extension for artifacts written with this codec
    fn extension(&self) -> &'static str;

    fn encode(&self, entry: &CacheEntry) -> Result<Vec<u8>, EngineError>;

    fn decode(&self, bytes: &[u8]) -> Result<CacheEntry, EngineError>;
}

/// Versioned JSON envelope around a context snapshot
#[derive(Serialize, Deserialize)]
struct Envelope {
    format: u32,
    pipeline_id: PipelineId,
    order: u32,
    step_type: StepType,
    fingerprint: String,
    parent_fingerprint: Option<String>,
    context: ExecutionContext,
}

/// JSON artifact codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonArtifactCodec;

impl ArtifactCodec for JsonArtifactCodec {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn encode(&self, entry: &CacheEntry) -> Result<Vec<u8>, EngineError> {
        let envelope = Envelope {
            format: FORMAT_VERSION,
            pipeline_id: entry.pipeline_id,
            order: entry.order,
            step_type: entry.step_type,
            fingerprint: entry.fingerprint.clone(),
            parent_fingerprint: entry.parent_fingerprint.clone(),
            context: entry.snapshot.clone(),
        };
        serde_json::to_vec(&envelope).map_err(|e| {
            EngineError::Cache(format!(
                "failed to encode context for pipeline {} step {}: {}",
                entry.pipeline_id, entry.order, e
            ))
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<CacheEntry, EngineError> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| EngineError::Cache(format!("corrupt cached context: {}", e)))?;

        if envelope.format != FORMAT_VERSION {
            return Err(EngineError::Cache(format!(
                "unsupported cached context format {} (expected {})",
                envelope.format, FORMAT_VERSION
            )));
        }

        Ok(CacheEntry {
            pipeline_id: envelope.pipeline_id,
            order: envelope.order,
            step_type: envelope.step_type,
            snapshot: envelope.context,
            fingerprint: envelope.fingerprint,
            parent_fingerprint: envelope.parent_fingerprint,
        })
    }
}
