//! Transport abstraction between the orchestrator and the server.
//!
//! [`HttpTransport`](crate::HttpTransport) implements it over HTTP; tests
//! implement it in memory.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use ferry_protocol::ContentKey;
use ferry_protocol::messages::{CheckResponse, MergeResponse};
use ferry_transfer::{ChunkDescriptor, ProgressEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;

/// Boxed future returned by [`UploadTransport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// One chunk transfer: send `chunk` of `source`, starting `offset` bytes in.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub key: ContentKey,
    pub source: PathBuf,
    pub chunk: ChunkDescriptor,
    /// Bytes of this chunk already persisted remotely.
    pub offset: u64,
}

impl ChunkUpload {
    /// Number of bytes this transfer sends.
    pub fn remaining(&self) -> u64 {
        self.chunk.len().saturating_sub(self.offset)
    }
}

/// Abstract connection to an upload server.
pub trait UploadTransport: Send + Sync {
    /// Asks the server what it holds for `key`.
    fn check<'a>(&'a self, key: &'a ContentKey) -> TransportFuture<'a, CheckResponse>;

    /// Appends the unsent suffix of a chunk.
    ///
    /// Progress is reported on `progress` with bytes counted against the
    /// whole chunk. When `cancel` fires the request is dropped and
    /// [`UploadError::Cancelled`] returned. Resolves to the chunk's
    /// persisted length reported by the server.
    fn upload_chunk<'a>(
        &'a self,
        upload: &'a ChunkUpload,
        progress: mpsc::UnboundedSender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> TransportFuture<'a, u64>;

    /// Asks the server to assemble the staged chunks of a `size`-byte file.
    fn merge<'a>(&'a self, key: &'a ContentKey, size: u64) -> TransportFuture<'a, MergeResponse>;
}
