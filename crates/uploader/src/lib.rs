//! Resumable upload client.
//!
//! [`Uploader`] validates a file, derives its content key, asks the server
//! what it already holds and sends only the missing byte ranges, in
//! parallel, before requesting the merge. The network side sits behind
//! [`UploadTransport`] so the orchestrator can be driven by an in-memory
//! server in tests.

mod config;
mod error;
mod http;
mod orchestrator;
pub mod prober;
mod transport;

pub use config::{DEFAULT_CONCURRENCY, RetryPolicy, UploadConfig};
pub use error::UploadError;
pub use http::HttpTransport;
pub use orchestrator::{UploadControl, UploadEvent, UploadOutcome, UploadState, Uploader};
pub use prober::RemoteState;
pub use transport::{ChunkUpload, TransportFuture, UploadTransport};
