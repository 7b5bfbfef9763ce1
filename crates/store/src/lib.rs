//! Server-side chunk storage for resumable uploads.
//!
//! [`ChunkStore`] persists chunk bytes append-only under a per-upload staging
//! directory and answers resume probes by listing it. [`MergeEngine`] turns a
//! complete staging directory into the final artifact with positional writes.
//!
//! # Layout
//!
//! ```text
//! public_dir/<key>                    merged artifacts
//! temp_dir/<key>/<key>.part<N>        staged chunks
//! ```
//!
//! There is no manifest file: a half-written chunk is simply a shorter file,
//! which `probe` reports as-is.

mod locks;
mod merge;
mod store;

use std::path::{Path, PathBuf};
use std::time::Duration;

use ferry_protocol::ContentKey;
use ferry_protocol::constants::DEFAULT_CHUNK_SIZE;

pub use merge::{MergeEngine, MergeOutcome};
pub use store::{ChunkStore, ProbeResult};

/// Copy buffer for chunk appends and merges (256 KiB).
pub const IO_BUFFER_SIZE: usize = 256 * 1024;

/// Errors produced by the chunk store and merge engine.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid name: {0}")]
    InvalidName(#[from] ferry_protocol::KeyError),

    #[error("no upload in progress for {0}")]
    NotFound(String),

    #[error("offset mismatch for {chunk}: client sent {expected}, stored {actual}")]
    OffsetMismatch {
        chunk: String,
        expected: u64,
        actual: u64,
    },

    #[error("upload {key} is incomplete: {reason}")]
    Incomplete { key: String, reason: String },

    #[error("upload of {chunk} aborted after {persisted} bytes: {source}")]
    Aborted {
        chunk: String,
        persisted: u64,
        #[source]
        source: std::io::Error,
    },
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding merged artifacts.
    pub public_dir: PathBuf,
    /// Directory holding per-upload staging directories.
    pub temp_dir: PathBuf,
    /// Chunk size shared with clients; chunk `i` merges at `i * chunk_size`.
    pub chunk_size: u64,
    /// Pause after every buffered write of an append (demo throttling).
    pub append_delay: Option<Duration>,
}

impl StoreConfig {
    /// Config rooted at `base`, using `base/public` and `base/temp`.
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            public_dir: base.join("public"),
            temp_dir: base.join("temp"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            append_delay: None,
        }
    }

    /// Path of the merged artifact for `key`.
    pub fn final_path(&self, key: &ContentKey) -> PathBuf {
        self.public_dir.join(key.as_str())
    }

    /// Path of the staging directory for `key`.
    pub fn staging_dir(&self, key: &ContentKey) -> PathBuf {
        self.temp_dir.join(key.as_str())
    }
}
