//! Wire protocol types for Ferry resumable uploads.
//!
//! Shared by the uploader (client) and the upload server: endpoint paths,
//! query and response bodies, the content key and the chunk naming scheme.

pub mod constants;
pub mod messages;
pub mod types;

pub use types::{ContentKey, KeyError, parse_chunk_index};
