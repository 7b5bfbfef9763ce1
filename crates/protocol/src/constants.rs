use std::time::Duration;

/// Default chunk size: 100 MiB.
///
/// Client and server must agree on this value; the merge engine places
/// chunk `i` at offset `i * chunk_size`.
pub const DEFAULT_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

/// Largest file the uploader accepts (4000 MiB).
pub const MAX_FILE_SIZE: u64 = 4000 * 1024 * 1024;

/// File extensions the uploader accepts (JPEG, PNG, MP4).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "mp4"];

/// Separator between the content key and the chunk index in a chunk name.
pub const PART_SEPARATOR: &str = ".part";

/// Longest accepted content key or chunk name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Upload existence / resume probe.
pub const CHECK_PATH: &str = "/api/check";

/// Chunk append.
pub const UPLOAD_PATH: &str = "/api/upload";

/// Merge trigger.
pub const MERGE_PATH: &str = "/api/merge";

/// Prefix under which merged artifacts are served.
pub const STATIC_PATH: &str = "/static";

/// Default HTTP port of the upload server.
pub const DEFAULT_PORT: u16 = 8000;

/// Number of genuine failures tolerated before an upload is abandoned.
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Timeout for short request/response calls (check).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the merge call.
///
/// Merging copies every chunk into the final artifact, which for files near
/// [`MAX_FILE_SIZE`] takes far longer than a probe.
pub const MERGE_TIMEOUT: Duration = Duration::from_secs(600);

/// Timeout for establishing a connection to the server.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
