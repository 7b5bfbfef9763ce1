use std::path::PathBuf;

use clap::Parser;

use ferry_protocol::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_PORT, DEFAULT_RETRY_LIMIT};
use ferry_uploader::{DEFAULT_CONCURRENCY, RetryPolicy, UploadConfig};

/// Uploads a file to a Ferry server in resumable chunks.
///
/// While uploading, type `p` + Enter to pause, `r` to resume and `q` to
/// abandon.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// File to upload (jpg, jpeg, png or mp4).
    pub file: PathBuf,

    /// Base URL of the upload server.
    #[arg(short, long, default_value_t = format!("http://localhost:{DEFAULT_PORT}"))]
    pub server: String,

    /// Chunk size in bytes. Must match the server's.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, value_parser = clap::value_parser!(u64).range(1..))]
    pub chunk_size: u64,

    /// Chunks sent at once (0 = all outstanding chunks).
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Failed attempts tolerated before giving up.
    #[arg(long, default_value_t = DEFAULT_RETRY_LIMIT)]
    pub retries: u32,
}

impl Args {
    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            chunk_size: self.chunk_size,
            concurrency: (self.concurrency > 0).then_some(self.concurrency),
            retry: RetryPolicy {
                limit: self.retries.max(1),
                ..RetryPolicy::default()
            },
            ..UploadConfig::default()
        }
    }
}
