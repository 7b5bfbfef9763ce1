//! HTTP transport built on `reqwest`.

use futures_util::StreamExt;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ferry_protocol::ContentKey;
use ferry_protocol::constants::{
    CHECK_PATH, CONNECT_TIMEOUT, MERGE_PATH, MERGE_TIMEOUT, REQUEST_TIMEOUT, UPLOAD_PATH,
};
use ferry_protocol::messages::{
    CheckQuery, CheckResponse, ErrorResponse, MergeQuery, MergeResponse, UploadQuery,
    UploadResponse,
};
use ferry_transfer::{ProgressEvent, open_range};

use crate::error::UploadError;
use crate::transport::{ChunkUpload, TransportFuture, UploadTransport};

/// Read size for streaming chunk bodies.
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Talks to an upload server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Creates a transport for the server at `base_url`
    /// (e.g. `http://localhost:8000`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, UploadError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send_chunk(
        &self,
        upload: &ChunkUpload,
        progress: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Result<u64, UploadError> {
        let chunk = &upload.chunk;
        let reader = open_range(&upload.source, chunk.start + upload.offset..chunk.end).await?;

        let name = chunk.name.clone();
        let total = chunk.len();
        let mut sent = upload.offset;
        let body = ReaderStream::with_capacity(reader, STREAM_BUFFER_SIZE).map(move |read| {
            if let Ok(bytes) = &read {
                sent += bytes.len() as u64;
                let _ = progress.send(ProgressEvent {
                    chunk_name: name.clone(),
                    bytes_sent: sent,
                    bytes_total: total,
                });
            }
            read
        });

        let query = UploadQuery {
            filename: upload.key.to_string(),
            chunk_file_name: chunk.name.clone(),
            offset: Some(upload.offset),
        };
        let response = self
            .client
            .post(self.url(UPLOAD_PATH))
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;

        let reply: UploadResponse = match decode(response).await {
            Err(UploadError::Server { status: 409, message }) => {
                return Err(UploadError::Conflict(message));
            }
            reply => reply?,
        };
        debug!(chunk = %chunk.name, persisted = reply.size, "chunk sent");
        Ok(reply.size)
    }
}

impl UploadTransport for HttpTransport {
    fn check<'a>(&'a self, key: &'a ContentKey) -> TransportFuture<'a, CheckResponse> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.url(CHECK_PATH))
                .query(&CheckQuery {
                    filename: key.to_string(),
                })
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await?;
            decode(response).await
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        upload: &'a ChunkUpload,
        progress: mpsc::UnboundedSender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> TransportFuture<'a, u64> {
        Box::pin(async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(UploadError::Cancelled),
                result = self.send_chunk(upload, progress) => result,
            }
        })
    }

    fn merge<'a>(&'a self, key: &'a ContentKey, size: u64) -> TransportFuture<'a, MergeResponse> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.url(MERGE_PATH))
                .query(&MergeQuery {
                    filename: key.to_string(),
                    size: Some(size),
                })
                .timeout(MERGE_TIMEOUT)
                .send()
                .await?;
            decode(response).await
        })
    }
}

/// Decodes a JSON reply, turning error statuses into [`UploadError::Server`].
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, UploadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let message = match response.json::<ErrorResponse>().await {
        Ok(body) => body.message,
        Err(_) => status.to_string(),
    };
    Err(UploadError::Server {
        status: status.as_u16(),
        message,
    })
}
