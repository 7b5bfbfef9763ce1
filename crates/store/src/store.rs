use std::sync::Arc;

use ferry_protocol::ContentKey;
use ferry_protocol::messages::UploadedChunk;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::locks::PathLocks;
use crate::merge::MergeEngine;
use crate::{IO_BUFFER_SIZE, StoreConfig, StoreError};

/// Result of probing an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// The merged artifact exists; nothing needs uploading.
    Exists,
    /// A staging directory exists. Chunks are sorted by index; the list may
    /// be empty.
    Partial(Vec<UploadedChunk>),
    /// Neither artifact nor staging directory exists.
    NotFound,
}

/// Append-only chunk staging.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    config: Arc<StoreConfig>,
    locks: Arc<PathLocks>,
}

impl ChunkStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config: Arc::new(config),
            locks: Arc::new(PathLocks::default()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns a merge engine sharing this store's layout and chunk locks.
    pub fn merge_engine(&self) -> MergeEngine {
        MergeEngine::new(Arc::clone(&self.config), Arc::clone(&self.locks))
    }

    /// Reports whether `key` is merged, staged (with per-chunk lengths), or
    /// unknown.
    ///
    /// Each chunk's length is read under its lock, so a writer holding it is
    /// waited for. An append that has not taken the lock yet can still grow
    /// the chunk afterwards; the offset check in
    /// [`append_chunk`](Self::append_chunk) rejects transfers started from
    /// the older length.
    pub async fn probe(&self, key: &ContentKey) -> Result<ProbeResult, StoreError> {
        if tokio::fs::try_exists(self.config.final_path(key)).await? {
            return Ok(ProbeResult::Exists);
        }

        let dir = self.config.staging_dir(key);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // A merge may have retired the staging area in between.
                if tokio::fs::try_exists(self.config.final_path(key)).await? {
                    return Ok(ProbeResult::Exists);
                }
                return Ok(ProbeResult::NotFound);
            }
            Err(e) => return Err(e.into()),
        };

        let mut chunks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Ok(index) = key.chunk_index(&name) else {
                warn!(key = %key, entry = %name, "ignoring foreign file in staging area");
                continue;
            };

            let path = entry.path();
            let _guard = self.locks.lock(&path).await;
            let size = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            chunks.push((index, UploadedChunk {
                chunk_file_name: name,
                size,
            }));
        }
        chunks.sort_by_key(|(index, _)| *index);

        debug!(key = %key, chunks = chunks.len(), "probed staging area");
        Ok(ProbeResult::Partial(
            chunks.into_iter().map(|(_, chunk)| chunk).collect(),
        ))
    }

    /// Appends `body` to the chunk file `chunk_name` of `key`.
    ///
    /// Creates the staging directory and chunk file on first use. When
    /// `expected_offset` is given and differs from the stored length, nothing
    /// is written. If `body` fails mid-stream the bytes already written stay
    /// on disk and [`StoreError::Aborted`] reports how many are persisted.
    ///
    /// Returns the chunk's persisted length after the append.
    pub async fn append_chunk<R>(
        &self,
        key: &ContentKey,
        chunk_name: &str,
        expected_offset: Option<u64>,
        body: R,
    ) -> Result<u64, StoreError>
    where
        R: AsyncRead + Unpin,
    {
        key.chunk_index(chunk_name)?;

        let dir = self.config.staging_dir(key);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(chunk_name);

        let _guard = self.locks.lock(&path).await;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let current = file.metadata().await?.len();

        if let Some(expected) = expected_offset.filter(|&expected| expected != current) {
            warn!(chunk = chunk_name, expected, actual = current, "rejecting append at stale offset");
            return Err(StoreError::OffsetMismatch {
                chunk: chunk_name.to_string(),
                expected,
                actual: current,
            });
        }

        let copied = self.copy_body(&mut file, body).await;
        file.flush().await?;

        match copied {
            Ok(written) => {
                let persisted = current + written;
                debug!(chunk = chunk_name, written, persisted, "chunk appended");
                Ok(persisted)
            }
            Err(source) => {
                let persisted = file.metadata().await.map(|m| m.len()).unwrap_or(current);
                info!(chunk = chunk_name, persisted, "append interrupted, keeping flushed bytes");
                Err(StoreError::Aborted {
                    chunk: chunk_name.to_string(),
                    persisted,
                    source,
                })
            }
        }
    }

    /// Opens the merged artifact for reading, if present.
    pub async fn open_artifact(
        &self,
        key: &ContentKey,
    ) -> Result<Option<(tokio::fs::File, u64)>, StoreError> {
        match tokio::fs::File::open(self.config.final_path(key)).await {
            Ok(file) => {
                let len = file.metadata().await?.len();
                Ok(Some((file, len)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Copies `body` into `file`, returning the bytes written.
    ///
    /// Every buffer is written fully before the next read, so on a read error
    /// everything counted so far has been handed to the file.
    async fn copy_body<R>(&self, file: &mut tokio::fs::File, mut body: R) -> std::io::Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; IO_BUFFER_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = body.read(&mut buf).await?;
            if n == 0 {
                return Ok(written);
            }
            file.write_all(&buf[..n]).await?;
            written += n as u64;

            if let Some(delay) = self.config.append_delay {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;
    use tokio::io::ReadBuf;

    fn key() -> ContentKey {
        ContentKey::new("5f2b", "mp4").unwrap()
    }

    fn store(dir: &TempDir) -> ChunkStore {
        let mut config = StoreConfig::rooted_at(dir.path());
        config.chunk_size = 100;
        ChunkStore::new(config)
    }

    /// Yields `data` and then fails, like a client aborting mid-body.
    struct FailingBody {
        data: Vec<u8>,
        sent: bool,
    }

    impl AsyncRead for FailingBody {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.sent {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "client aborted",
                )));
            }
            buf.put_slice(&self.data);
            self.sent = true;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn probe_unknown_key_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert_eq!(store.probe(&key()).await.unwrap(), ProbeResult::NotFound);
    }

    #[tokio::test]
    async fn probe_reports_appended_length() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = key();
        let name = key.chunk_name(0);

        let persisted = store
            .append_chunk(&key, &name, None, &[7u8; 40][..])
            .await
            .unwrap();
        assert_eq!(persisted, 40);

        let probe = store.probe(&key).await.unwrap();
        assert_eq!(
            probe,
            ProbeResult::Partial(vec![UploadedChunk {
                chunk_file_name: name,
                size: 40,
            }])
        );
    }

    #[tokio::test]
    async fn probe_empty_staging_is_partial() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = key();
        std::fs::create_dir_all(store.config().staging_dir(&key)).unwrap();

        assert_eq!(store.probe(&key).await.unwrap(), ProbeResult::Partial(vec![]));
    }

    #[tokio::test]
    async fn probe_existing_artifact_is_exists() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = key();
        std::fs::create_dir_all(&store.config().public_dir).unwrap();
        std::fs::write(store.config().final_path(&key), b"done").unwrap();

        assert_eq!(store.probe(&key).await.unwrap(), ProbeResult::Exists);
    }

    #[tokio::test]
    async fn probe_sorts_numerically_and_skips_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = key();
        for index in [10u64, 2, 9] {
            store
                .append_chunk(&key, &key.chunk_name(index), None, &b"x"[..])
                .await
                .unwrap();
        }
        std::fs::write(store.config().staging_dir(&key).join("stray.txt"), b"?").unwrap();

        let ProbeResult::Partial(list) = store.probe(&key).await.unwrap() else {
            panic!("expected partial");
        };
        let names: Vec<_> = list.iter().map(|c| c.chunk_file_name.clone()).collect();
        assert_eq!(
            names,
            vec![key.chunk_name(2), key.chunk_name(9), key.chunk_name(10)]
        );
    }

    #[tokio::test]
    async fn appends_accumulate() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = key();
        let name = key.chunk_name(1);

        store.append_chunk(&key, &name, None, &b"Hello"[..]).await.unwrap();
        let persisted = store
            .append_chunk(&key, &name, Some(5), &b" World"[..])
            .await
            .unwrap();
        assert_eq!(persisted, 11);

        let path = store.config().staging_dir(&key).join(&name);
        assert_eq!(std::fs::read(path).unwrap(), b"Hello World");
    }

    #[tokio::test]
    async fn stale_offset_is_rejected_without_writing() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = key();
        let name = key.chunk_name(0);
        store.append_chunk(&key, &name, None, &[1u8; 40][..]).await.unwrap();

        let result = store.append_chunk(&key, &name, Some(30), &[2u8; 70][..]).await;
        assert!(matches!(
            result,
            Err(StoreError::OffsetMismatch { expected: 30, actual: 40, .. })
        ));

        let path = store.config().staging_dir(&key).join(&name);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 40);
    }

    #[tokio::test]
    async fn aborted_body_keeps_flushed_bytes() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = key();
        let name = key.chunk_name(2);

        let body = FailingBody {
            data: vec![9u8; 30],
            sent: false,
        };
        let result = store.append_chunk(&key, &name, Some(0), body).await;
        assert!(matches!(result, Err(StoreError::Aborted { persisted: 30, .. })));

        let ProbeResult::Partial(list) = store.probe(&key).await.unwrap() else {
            panic!("expected partial");
        };
        assert_eq!(list[0].size, 30);
    }

    #[tokio::test]
    async fn rejects_chunk_of_another_key() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = key();
        let other = ContentKey::new("beef", "png").unwrap();

        let result = store
            .append_chunk(&key, &other.chunk_name(0), None, &b"x"[..])
            .await;
        assert!(matches!(result, Err(StoreError::InvalidName(_))));
        assert!(!store.config().staging_dir(&key).exists());
    }

    #[tokio::test]
    async fn concurrent_appends_to_different_chunks() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = key();

        let mut handles = Vec::new();
        for index in 0..8u64 {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                let data = vec![index as u8; 100];
                store
                    .append_chunk(&key, &key.chunk_name(index), Some(0), &data[..])
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 100);
        }

        let ProbeResult::Partial(list) = store.probe(&key).await.unwrap() else {
            panic!("expected partial");
        };
        assert_eq!(list.len(), 8);
        assert!(list.iter().all(|c| c.size == 100));
    }

    #[tokio::test]
    async fn open_artifact_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.open_artifact(&key()).await.unwrap().is_none());
    }
}
