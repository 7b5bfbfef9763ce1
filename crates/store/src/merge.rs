use std::path::{Path, PathBuf};
use std::sync::Arc;

use ferry_protocol::ContentKey;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::locks::PathLocks;
use crate::{IO_BUFFER_SIZE, StoreConfig, StoreError};

/// What a merge request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Staged chunks were assembled into an artifact of `size` bytes.
    Merged { size: u64 },
    /// The artifact was already in place; nothing was touched.
    AlreadyPresent,
}

#[derive(Debug)]
struct StagedChunk {
    index: u64,
    path: PathBuf,
    len: u64,
}

/// Assembles staged chunks into the final artifact.
///
/// Chunk `i` is written at offset `i * chunk_size` of a preallocated temp
/// file, all chunks in parallel. The temp file only becomes visible under
/// the artifact name once every write has landed, so a failed or crashed
/// merge never leaves a truncated artifact behind.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    config: Arc<StoreConfig>,
    locks: Arc<PathLocks>,
}

impl MergeEngine {
    pub(crate) fn new(config: Arc<StoreConfig>, locks: Arc<PathLocks>) -> Self {
        Self { config, locks }
    }

    /// Merges the staged chunks of `key`.
    ///
    /// With `expected_size`, the chunk set must match exactly what a file of
    /// that size splits into. Without it, indices must still be contiguous
    /// from 0 and every chunk but the last must be full. On any failure the
    /// staging directory is left as it was so the client can resume.
    pub async fn merge(
        &self,
        key: &ContentKey,
        expected_size: Option<u64>,
    ) -> Result<MergeOutcome, StoreError> {
        let final_path = self.config.final_path(key);
        if tokio::fs::try_exists(&final_path).await? {
            debug!(key = %key, "artifact already present");
            return Ok(MergeOutcome::AlreadyPresent);
        }

        let staging = self.config.staging_dir(key);
        let _staging_guard = self.locks.lock(&staging).await;

        // Another merge may have finished while we waited.
        if tokio::fs::try_exists(&final_path).await? {
            return Ok(MergeOutcome::AlreadyPresent);
        }

        let chunks = match self.collect(key, &staging).await? {
            Some(chunks) => chunks,
            None if expected_size == Some(0) => Vec::new(),
            None => return Err(StoreError::NotFound(key.to_string())),
        };
        let total = self.verify(key, &chunks, expected_size)?;

        let mut chunk_guards = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            chunk_guards.push(self.locks.lock(&chunk.path).await);
        }
        // Lengths may have moved while we were acquiring locks.
        for chunk in &chunks {
            let len = tokio::fs::metadata(&chunk.path).await?.len();
            if len != chunk.len {
                return Err(StoreError::Incomplete {
                    key: key.to_string(),
                    reason: format!("chunk {} changed during merge", chunk.index),
                });
            }
        }

        tokio::fs::create_dir_all(&self.config.public_dir).await?;
        let temp_path = self.config.public_dir.join(format!(".{key}.merging"));

        if let Err(e) = self.assemble(&temp_path, chunks, total).await {
            warn!(key = %key, error = %e, "merge failed, staging kept");
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        drop(chunk_guards);
        match tokio::fs::remove_dir_all(&staging).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(key = %key, error = %e, "failed to remove staging directory"),
        }

        info!(key = %key, size = total, "upload merged");
        Ok(MergeOutcome::Merged { size: total })
    }

    /// Lists this key's chunks, or `None` when there is no staging directory.
    async fn collect(
        &self,
        key: &ContentKey,
        staging: &Path,
    ) -> Result<Option<Vec<StagedChunk>>, StoreError> {
        let mut entries = match tokio::fs::read_dir(staging).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut chunks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Ok(index) = key.chunk_index(&name) else {
                continue;
            };
            let len = entry.metadata().await?.len();
            chunks.push(StagedChunk {
                index,
                path: entry.path(),
                len,
            });
        }
        chunks.sort_by_key(|c| c.index);
        Ok(Some(chunks))
    }

    /// Checks the chunk set is complete and returns the artifact size.
    fn verify(
        &self,
        key: &ContentKey,
        chunks: &[StagedChunk],
        expected_size: Option<u64>,
    ) -> Result<u64, StoreError> {
        let incomplete = |reason: String| StoreError::Incomplete {
            key: key.to_string(),
            reason,
        };
        let chunk_size = self.config.chunk_size;

        for (position, chunk) in chunks.iter().enumerate() {
            if chunk.index != position as u64 {
                return Err(incomplete(format!("chunk {position} is missing")));
            }
        }

        if let Some(size) = expected_size {
            let expected_count = size.div_ceil(chunk_size);
            if chunks.len() as u64 != expected_count {
                return Err(incomplete(format!(
                    "expected {expected_count} chunks, found {}",
                    chunks.len()
                )));
            }
            for chunk in chunks {
                let start = chunk.index * chunk_size;
                let want = (start + chunk_size).min(size) - start;
                if chunk.len != want {
                    return Err(incomplete(format!(
                        "chunk {} holds {} of {want} bytes",
                        chunk.index, chunk.len
                    )));
                }
            }
            return Ok(size);
        }

        if chunks.is_empty() {
            return Err(incomplete("no chunks staged".to_string()));
        }
        let last = chunks.len() - 1;
        for chunk in chunks {
            let full = chunk.len == chunk_size;
            let tail_ok = chunk.index as usize == last && chunk.len > 0 && chunk.len <= chunk_size;
            if !full && !tail_ok {
                return Err(incomplete(format!(
                    "chunk {} holds {} of {chunk_size} bytes",
                    chunk.index, chunk.len
                )));
            }
        }
        Ok(chunks.iter().map(|c| c.len).sum())
    }

    /// Writes every chunk into a preallocated `temp_path` and syncs it.
    async fn assemble(
        &self,
        temp_path: &Path,
        chunks: Vec<StagedChunk>,
        total: u64,
    ) -> Result<(), StoreError> {
        let file = tokio::fs::File::create(temp_path).await?;
        file.set_len(total).await?;

        let chunk_size = self.config.chunk_size;
        let mut tasks = JoinSet::new();
        for chunk in chunks {
            let temp_path = temp_path.to_path_buf();
            tasks.spawn(async move {
                write_at(&temp_path, &chunk.path, chunk.index * chunk_size).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let written = joined.map_err(std::io::Error::other)??;
            debug!(bytes = written, "chunk merged");
        }

        file.sync_all().await?;
        Ok(())
    }
}

/// Copies the file at `source` into `target` starting at `offset`.
async fn write_at(target: &Path, source: &Path, offset: u64) -> Result<u64, StoreError> {
    let mut out = tokio::fs::OpenOptions::new().write(true).open(target).await?;
    out.seek(std::io::SeekFrom::Start(offset)).await?;

    let input = tokio::fs::File::open(source).await?;
    let mut reader = BufReader::with_capacity(IO_BUFFER_SIZE, input);
    let written = tokio::io::copy_buf(&mut reader, &mut out).await?;
    out.flush().await?;
    Ok(written)
}
