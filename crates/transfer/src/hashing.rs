use std::io::Read;
use std::path::Path;

use ferry_protocol::ContentKey;
use sha2::{Digest, Sha256};

use crate::TransferError;

/// Read buffer for hashing (1 MiB).
const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
///
/// Blocking; call through `spawn_blocking` from async code.
pub fn hash_file(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Derives the content key of a file: `hex(sha256(bytes)) + "." + extension`.
///
/// Identical bytes with the same extension always produce the same key, so a
/// resumed upload lands in the same staging area as the interrupted one.
pub fn content_key_for(path: &Path) -> Result<ContentKey, TransferError> {
    let digest = hash_file(path)?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    Ok(ContentKey::new(&digest, extension)?)
}
