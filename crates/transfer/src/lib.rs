//! Client-side transfer building blocks.
//!
//! - content keys derived from file bytes ([`content_key_for`])
//! - chunk planning ([`split`]) and range reads ([`open_range`])
//! - source validation before any network call ([`validate_source`])
//! - a pure progress reducer ([`ProgressAggregator`])

mod hashing;
mod progress;
mod splitter;
mod validation;

pub use hashing::{content_key_for, hash_file};
pub use progress::{ProgressAggregator, ProgressEvent, ProgressSnapshot};
pub use splitter::{ChunkDescriptor, chunk_count, open_range, split};
pub use validation::{SourceFile, ValidationError, ValidationRules, validate_source};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("range {start}..{end} is outside a {size}-byte file")]
    RangeOutOfBounds { start: u64, end: u64, size: u64 },

    #[error("invalid content key: {0}")]
    Key(#[from] ferry_protocol::KeyError),
}
