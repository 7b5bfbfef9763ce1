use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Query strings
// ---------------------------------------------------------------------------

/// `GET /api/check?filename=<key>`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckQuery {
    #[serde(default)]
    pub filename: String,
}

/// `POST /api/upload?filename=<key>&chunkFileName=<name>[&offset=<n>]`
///
/// `offset` is the length the client believes is already persisted. When
/// present the server refuses the append if its own length differs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadQuery {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub chunk_file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

/// `GET /api/merge?filename=<key>[&size=<n>]`
///
/// `size` is the original file size; the server uses it to derive the
/// expected chunk count and refuse an incomplete merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeQuery {
    #[serde(default)]
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// A chunk file present in an upload's staging area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedChunk {
    pub chunk_file_name: String,
    pub size: u64,
}

/// Response to a check request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    /// The final artifact is already stored.
    pub exists: bool,
    /// A staging area exists (possibly empty).
    #[serde(default)]
    pub uploading: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uploaded_list: Vec<UploadedChunk>,
}

/// Response to a chunk append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub filename: String,
    /// Persisted length of the chunk after the append.
    #[serde(default)]
    pub size: u64,
}

/// Response to a merge request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub filename: String,
}

/// Body returned with every non-2xx status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
