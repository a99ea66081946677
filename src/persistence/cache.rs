//! Per-step context cache
//!
//! One entry per `(pipeline_id, order)`, holding the context as it stood
//! after that step. Entries are chained by fingerprint: each entry records the
//! fingerprint of the entry it was computed from, which lets the engine drop
//! downstream entries once an upstream step's configuration changes.

use crate::core::{EngineError, ExecutionContext, PipelineId, StepKind, StepType};
use crate::persistence::codec::{ArtifactCodec, JsonArtifactCodec};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

/// A cached context snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub pipeline_id: PipelineId,
    pub order: u32,
    pub step_type: StepType,
    /// Context after the step ran
    pub snapshot: ExecutionContext,
    /// Fingerprint of this step's configuration chained onto its parent's
    pub fingerprint: String,
    /// Fingerprint of the entry at `order - 1`; `None` for the first step
    pub parent_fingerprint: Option<String>,
}

/// Storage for cached contexts
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Write an entry, replacing any previous one for the same key
    async fn put(&self, entry: &CacheEntry) -> Result<(), EngineError>;

    /// Read an entry; a corrupt entry is a cache error, not `None`
    async fn get(&self, pipeline_id: PipelineId, order: u32) -> Result<Option<CacheEntry>, EngineError>;

    /// Delete an entry, returning whether it existed
    async fn remove(&self, pipeline_id: PipelineId, order: u32) -> Result<bool, EngineError>;

    /// Orders with an entry for the pipeline, ascending
    async fn orders(&self, pipeline_id: PipelineId) -> Result<Vec<u32>, EngineError>;
}

/// Fingerprint of a step configuration chained onto its parent's fingerprint
pub fn fingerprint(parent: Option<&str>, kind: &StepKind) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent.unwrap_or("").as_bytes());
    hasher.update(b"\n");
    hasher.update(kind.step_type().as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_json(&kind.config_json()).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// JSON with object keys sorted at every level
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> =
                map.iter().map(|(k, v)| (k, canonical_json(v))).collect();
            let items: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                .collect();
            format!("{{{}}}", items.join(","))
        }
        other => other.to_string(),
    }
}

fn cache_io_error(action: &str, path: &Path, err: std::io::Error) -> EngineError {
    EngineError::Cache(format!("failed to {} {}: {}", action, path.display(), err))
}

/// Filesystem cache: one artifact file per entry
///
/// Files are named `pipeline_{id}_step_{order}.{ext}` and written through a
/// temporary file plus rename, so readers never see a partial artifact.
pub struct FsCacheStore {
    dir: PathBuf,
    codec: Arc<dyn ArtifactCodec>,
    locks: Mutex<HashMap<(PipelineId, u32), Arc<Mutex<()>>>>,
}

impl FsCacheStore {
    /// Create a store under `dir` using the JSON codec
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_codec(dir, Arc::new(JsonArtifactCodec))
    }

    pub fn with_codec(dir: impl Into<PathBuf>, codec: Arc<dyn ArtifactCodec>) -> Self {
        Self {
            dir: dir.into(),
            codec,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Artifact path for a key
    pub fn path_for(&self, pipeline_id: PipelineId, order: u32) -> PathBuf {
        self.dir.join(format!(
            "pipeline_{}_step_{}.{}",
            pipeline_id,
            order,
            self.codec.extension()
        ))
    }

    async fn key_lock(&self, pipeline_id: PipelineId, order: u32) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry((pipeline_id, order))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn parse_file_name(&self, name: &str) -> Option<(PipelineId, u32)> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| {
            Regex::new(r"^pipeline_(-?\d+)_step_(\d+)\.([A-Za-z0-9]+)$")
                .expect("artifact name pattern is valid")
        });
        let caps = re.captures(name)?;
        if &caps[3] != self.codec.extension() {
            return None;
        }
        Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
    }
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn put(&self, entry: &CacheEntry) -> Result<(), EngineError> {
        let lock = self.key_lock(entry.pipeline_id, entry.order).await;
        let _guard = lock.lock().await;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| cache_io_error("create cache directory", &self.dir, e))?;

        let bytes = self.codec.encode(entry)?;
        let path = self.path_for(entry.pipeline_id, entry.order);
        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| cache_io_error("write", &tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(cache_io_error("replace", &path, e));
        }

        debug!(
            pipeline_id = entry.pipeline_id,
            order = entry.order,
            "Cached context at {}",
            path.display()
        );
        Ok(())
    }

    async fn get(&self, pipeline_id: PipelineId, order: u32) -> Result<Option<CacheEntry>, EngineError> {
        let lock = self.key_lock(pipeline_id, order).await;
        let _guard = lock.lock().await;

        let path = self.path_for(pipeline_id, order);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(cache_io_error("read", &path, e)),
        };

        let entry = self
            .codec
            .decode(&bytes)
            .map_err(|e| EngineError::Cache(format!("{}: {}", path.display(), e)))?;
        if entry.pipeline_id != pipeline_id || entry.order != order {
            return Err(EngineError::Cache(format!(
                "{} holds pipeline {} step {}",
                path.display(),
                entry.pipeline_id,
                entry.order
            )));
        }
        Ok(Some(entry))
    }

    async fn remove(&self, pipeline_id: PipelineId, order: u32) -> Result<bool, EngineError> {
        let lock = self.key_lock(pipeline_id, order).await;
        let _guard = lock.lock().await;

        let path = self.path_for(pipeline_id, order);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(cache_io_error("remove", &path, e)),
        }
    }

    async fn orders(&self, pipeline_id: PipelineId) -> Result<Vec<u32>, EngineError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(cache_io_error("list", &self.dir, e)),
        };

        let mut orders = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| cache_io_error("list", &self.dir, e))?
        {
            let name = entry.file_name();
            if let Some((pid, order)) = name.to_str().and_then(|n| self.parse_file_name(n)) {
                if pid == pipeline_id {
                    orders.push(order);
                }
            }
        }
        orders.sort_unstable();
        Ok(orders)
    }
}

/// In-memory cache keeping encoded bytes (for testing or ephemeral use)
pub struct InMemoryCacheStore {
    codec: Arc<dyn ArtifactCodec>,
    entries: RwLock<HashMap<(PipelineId, u32), Vec<u8>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self {
            codec: Arc::new(JsonArtifactCodec),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Encoded bytes of an entry
    pub async fn raw(&self, pipeline_id: PipelineId, order: u32) -> Option<Vec<u8>> {
        self.entries.read().await.get(&(pipeline_id, order)).cloned()
    }

    /// Store arbitrary bytes under a key
    pub async fn insert_raw(&self, pipeline_id: PipelineId, order: u32, bytes: Vec<u8>) {
        self.entries.write().await.insert((pipeline_id, order), bytes);
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn put(&self, entry: &CacheEntry) -> Result<(), EngineError> {
        let bytes = self.codec.encode(entry)?;
        self.entries
            .write()
            .await
            .insert((entry.pipeline_id, entry.order), bytes);
        Ok(())
    }

    async fn get(&self, pipeline_id: PipelineId, order: u32) -> Result<Option<CacheEntry>, EngineError> {
        let entries = self.entries.read().await;
        match entries.get(&(pipeline_id, order)) {
            Some(bytes) => self.codec.decode(bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn remove(&self, pipeline_id: PipelineId, order: u32) -> Result<bool, EngineError> {
        Ok(self.entries.write().await.remove(&(pipeline_id, order)).is_some())
    }

    async fn orders(&self, pipeline_id: PipelineId) -> Result<Vec<u32>, EngineError> {
        let entries = self.entries.read().await;
        let mut orders: Vec<u32> = entries
            .keys()
            .filter(|(pid, _)| *pid == pipeline_id)
            .map(|(_, order)| *order)
            .collect();
        orders.sort_unstable();
        Ok(orders)
    }
}
