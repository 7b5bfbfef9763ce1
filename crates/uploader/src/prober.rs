//! Resume probe.

use std::collections::HashMap;

use ferry_protocol::ContentKey;
use ferry_protocol::messages::UploadedChunk;
use tracing::debug;

use crate::error::UploadError;
use crate::transport::UploadTransport;

/// What the server holds for an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    /// The merged artifact exists.
    Exists,
    /// Some chunks (possibly none) are staged.
    Partial(Vec<UploadedChunk>),
    /// Nothing is known about the key.
    NotFound,
}

impl RemoteState {
    /// Bytes persisted remotely per chunk name.
    pub fn persisted(&self) -> HashMap<&str, u64> {
        match self {
            Self::Partial(list) => list
                .iter()
                .map(|c| (c.chunk_file_name.as_str(), c.size))
                .collect(),
            Self::Exists | Self::NotFound => HashMap::new(),
        }
    }
}

/// Queries the server once. Transport errors are returned as-is.
pub async fn probe(
    transport: &dyn UploadTransport,
    key: &ContentKey,
) -> Result<RemoteState, UploadError> {
    let response = transport.check(key).await?;
    let state = if response.exists {
        RemoteState::Exists
    } else if response.uploading || !response.uploaded_list.is_empty() {
        RemoteState::Partial(response.uploaded_list)
    } else {
        RemoteState::NotFound
    };
    debug!(key = %key, ?state, "probe");
    Ok(state)
}
