//! Rendered-loop store with LRU eviction of its index.
//!
//! Loops are written once per job as `{loop_id}.wav` in the output
//! directory. The in-memory index maps job ids to what was written; evicting
//! an index entry leaves the file on disk.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audio::write_wav_to_buffer;
use crate::error::{DaemonError, ErrorCode, Result};
use crate::types::{LoopMetadata, LoopResult};

/// Maximum number of index entries to keep.
const DEFAULT_MAX_ENTRIES: usize = 100;

/// A loop that has been written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLoop {
    pub job_id: String,
    pub loop_id: String,
    pub path: PathBuf,
    pub metadata: LoopMetadata,
}

struct IndexEntry {
    stored: StoredLoop,
    last_accessed: Instant,
}

/// Writes loops into one directory and remembers them by job id.
pub struct LoopStore {
    dir: PathBuf,
    index: HashMap<String, IndexEntry>,
    max_entries: usize,
}

impl LoopStore {
    /// Creates a store writing into `dir` with default index capacity.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_capacity(dir, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(dir: impl Into<PathBuf>, max_entries: usize) -> Self {
        Self {
            dir: dir.into(),
            index: HashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a loop id is written to.
    pub fn path_for(&self, loop_id: &str) -> PathBuf {
        self.dir.join(format!("{}.wav", loop_id))
    }

    /// Writes a job's loop unless it was already written.
    ///
    /// The file is written to a temporary name and renamed into place, so
    /// readers never see a partial WAV.
    pub fn store(&mut self, job_id: &str, loop_id: &str, result: &LoopResult) -> Result<StoredLoop> {
        if let Some(existing) = self.get(job_id) {
            debug!(job_id, "loop already stored");
            return Ok(existing.clone());
        }

        fs::create_dir_all(&self.dir).map_err(|e| {
            DaemonError::with_source(
                ErrorCode::AudioIoFailed,
                format!("Failed to create output directory {}", self.dir.display()),
                e,
            )
        })?;

        let path = self.path_for(loop_id);
        let bytes = write_wav_to_buffer(&result.buffer)?;
        let mut staging = tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| {
            DaemonError::with_source(ErrorCode::AudioIoFailed, "Failed to create staging file", e)
        })?;
        staging.write_all(&bytes).map_err(|e| {
            DaemonError::with_source(ErrorCode::AudioIoFailed, "Failed to write loop", e)
        })?;
        staging.persist(&path).map_err(|e| {
            DaemonError::with_source(
                ErrorCode::AudioIoFailed,
                format!("Failed to move loop into {}", path.display()),
                e.error,
            )
        })?;

        info!(job_id, loop_id, path = %path.display(), "loop written");
        let stored = StoredLoop {
            job_id: job_id.to_string(),
            loop_id: loop_id.to_string(),
            path,
            metadata: result.metadata(),
        };
        self.put(stored.clone());
        Ok(stored)
    }

    /// Returns a stored loop by job id, updating its access time.
    pub fn get(&mut self, job_id: &str) -> Option<&StoredLoop> {
        if let Some(entry) = self.index.get_mut(job_id) {
            entry.last_accessed = Instant::now();
            Some(&entry.stored)
        } else {
            None
        }
    }

    fn put(&mut self, stored: StoredLoop) {
        if self.index.len() >= self.max_entries && !self.index.contains_key(&stored.job_id) {
            self.evict_lru();
        }
        self.index.insert(
            stored.job_id.clone(),
            IndexEntry {
                stored,
                last_accessed: Instant::now(),
            },
        );
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.index.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Drops the least recently used index entry.
    pub fn evict_lru(&mut self) -> Option<StoredLoop> {
        let oldest_key = self
            .index
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(k, _)| k.clone())?;
        self.index.remove(&oldest_key).map(|entry| entry.stored)
    }
}
