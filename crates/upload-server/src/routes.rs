//! Request handlers.

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures_util::TryStreamExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info};

use ferry_protocol::ContentKey;
use ferry_protocol::constants::{CHECK_PATH, MERGE_PATH, STATIC_PATH, UPLOAD_PATH};
use ferry_protocol::messages::{
    CheckQuery, CheckResponse, MergeQuery, MergeResponse, UploadQuery, UploadResponse,
};
use ferry_store::{ChunkStore, MergeEngine, MergeOutcome, ProbeResult};

use crate::ServerError;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    store: ChunkStore,
    merger: MergeEngine,
}

impl AppState {
    pub fn new(store: ChunkStore) -> Self {
        let merger = store.merge_engine();
        Self { store, merger }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }
}

/// Builds the upload API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(CHECK_PATH, get(check))
        .route(UPLOAD_PATH, post(upload))
        .route(MERGE_PATH, get(merge))
        .route(&format!("{STATIC_PATH}/{{filename}}"), get(artifact))
        // Chunk bodies are streamed to disk and may be far larger than any
        // in-memory limit.
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

fn content_key(filename: &str) -> Result<ContentKey, ServerError> {
    if filename.is_empty() {
        return Err(ServerError::BadRequest("No filename provided.".into()));
    }
    Ok(ContentKey::parse(filename)?)
}

async fn check(
    State(state): State<AppState>,
    Query(query): Query<CheckQuery>,
) -> Result<Json<CheckResponse>, ServerError> {
    let key = content_key(&query.filename)?;

    let response = match state.store.probe(&key).await? {
        ProbeResult::Exists => CheckResponse {
            success: true,
            message: "File already exists".into(),
            exists: true,
            uploading: false,
            uploaded_list: Vec::new(),
        },
        ProbeResult::Partial(list) => CheckResponse {
            success: true,
            message: "Upload in progress".into(),
            exists: false,
            uploading: true,
            uploaded_list: list,
        },
        ProbeResult::NotFound => CheckResponse {
            success: true,
            message: "File not found".into(),
            exists: false,
            uploading: false,
            uploaded_list: Vec::new(),
        },
    };
    debug!(key = %key, exists = response.exists, chunks = response.uploaded_list.len(), "check");
    Ok(Json(response))
}

async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Body,
) -> Result<Json<UploadResponse>, ServerError> {
    let key = content_key(&query.filename)?;
    if query.chunk_file_name.is_empty() {
        return Err(ServerError::BadRequest("No chunk file name provided.".into()));
    }

    let reader = StreamReader::new(body.into_data_stream().map_err(std::io::Error::other));
    let size = state
        .store
        .append_chunk(&key, &query.chunk_file_name, query.offset, reader)
        .await?;

    Ok(Json(UploadResponse {
        success: true,
        message: "Chunk uploaded".into(),
        filename: query.chunk_file_name,
        size,
    }))
}

async fn merge(
    State(state): State<AppState>,
    Query(query): Query<MergeQuery>,
) -> Result<Json<MergeResponse>, ServerError> {
    let key = content_key(&query.filename)?;

    let message = match state.merger.merge(&key, query.size).await? {
        MergeOutcome::Merged { size } => {
            info!(key = %key, size, "merge request completed");
            "File merged successfully"
        }
        MergeOutcome::AlreadyPresent => "File already exists",
    };

    Ok(Json(MergeResponse {
        success: true,
        message: message.into(),
        filename: key.to_string(),
    }))
}

async fn artifact(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ServerError> {
    let key = content_key(&filename)?;
    let Some((file, len)) = state.store.open_artifact(&key).await? else {
        return Err(ferry_store::StoreError::NotFound(key.to_string()).into());
    };

    let headers = [
        (header::CONTENT_TYPE, mime_for(&key).to_string()),
        (header::CONTENT_LENGTH, len.to_string()),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

fn mime_for(key: &ContentKey) -> &'static str {
    let ext = key
        .as_str()
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or_default();
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_from_extension() {
        let key = ContentKey::new("ab", "JPG").unwrap();
        assert_eq!(mime_for(&key), "image/jpeg");
        assert_eq!(mime_for(&ContentKey::parse("ab").unwrap()), "application/octet-stream");
        assert_eq!(mime_for(&ContentKey::new("ab", "mp4").unwrap()), "video/mp4");
    }

    #[test]
    fn empty_filename_is_rejected() {
        let err = content_key("").unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "No filename provided.");
    }

    #[test]
    fn traversal_is_rejected() {
        assert!(content_key("../etc/passwd").is_err());
        assert!(content_key("a/b").is_err());
    }
}
