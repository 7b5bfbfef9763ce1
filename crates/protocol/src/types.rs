use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_NAME_LEN, PART_SEPARATOR};

/// Errors produced when validating content keys and chunk names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("empty name")]
    Empty,

    #[error("name too long: {0} bytes")]
    TooLong(usize),

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("chunk {chunk:?} does not belong to {key}")]
    ForeignChunk { key: String, chunk: String },

    #[error("malformed chunk index in {0:?}")]
    MalformedIndex(String),
}

/// Deterministic identifier of an upload: `hex(sha256(bytes)) + "." + ext`.
///
/// The same value names the final artifact and the staging directory, so it
/// must always be a single, non-hidden path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey(String);

impl ContentKey {
    /// Builds a key from a hex digest and a file extension.
    ///
    /// The extension is lowercased and may be given with or without the
    /// leading dot.
    pub fn new(digest_hex: &str, extension: &str) -> Result<Self, KeyError> {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        if ext.is_empty() {
            Self::parse(digest_hex)
        } else {
            Self::parse(&format!("{digest_hex}.{ext}"))
        }
    }

    /// Validates a key received over the wire.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        validate_segment(raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the chunk at `index`: `<key>.part<index>`.
    pub fn chunk_name(&self, index: u64) -> String {
        format!("{}{PART_SEPARATOR}{index}", self.0)
    }

    /// Parses the index out of one of this key's chunk names.
    pub fn chunk_index(&self, chunk_name: &str) -> Result<u64, KeyError> {
        let suffix = chunk_name
            .strip_prefix(self.0.as_str())
            .and_then(|rest| rest.strip_prefix(PART_SEPARATOR))
            .ok_or_else(|| KeyError::ForeignChunk {
                key: self.0.clone(),
                chunk: chunk_name.to_string(),
            })?;
        parse_index(suffix).ok_or_else(|| KeyError::MalformedIndex(chunk_name.to_string()))
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContentKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_segment(&value)?;
        Ok(Self(value))
    }
}

impl From<ContentKey> for String {
    fn from(key: ContentKey) -> Self {
        key.0
    }
}

/// Extracts the numeric index from any `<name>.part<N>` chunk name.
///
/// Returns `None` when the suffix is missing or not a plain decimal number,
/// so `part10` sorts after `part9` once parsed.
pub fn parse_chunk_index(chunk_name: &str) -> Option<u64> {
    let (_, suffix) = chunk_name.rsplit_once(PART_SEPARATOR)?;
    parse_index(suffix)
}

fn parse_index(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Rejects anything that is not a plain, visible file name.
fn validate_segment(name: &str) -> Result<(), KeyError> {
    if name.is_empty() {
        return Err(KeyError::Empty);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(KeyError::TooLong(name.len()));
    }
    if name.starts_with('.')
        || name
            .chars()
            .any(|c| c == '/' || c == '\\' || c == ':' || c.is_control())
    {
        return Err(KeyError::InvalidName(name.to_string()));
    }
    Ok(())
}
