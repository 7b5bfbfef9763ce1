use std::io::SeekFrom;
use std::ops::Range;
use std::path::Path;

use ferry_protocol::ContentKey;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::TransferError;

/// One planned chunk of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub index: u64,
    /// First byte of the chunk within the source file.
    pub start: u64,
    /// One past the last byte.
    pub end: u64,
    /// `<key>.part<index>`
    pub name: String,
}

impl ChunkDescriptor {
    /// Length of the chunk in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<u64> {
        self.start..self.end
    }

    /// Byte range still to send when `persisted` bytes are already stored.
    ///
    /// Empty when the chunk is complete.
    pub fn remaining_from(&self, persisted: u64) -> Range<u64> {
        (self.start + persisted.min(self.len()))..self.end
    }
}

/// Number of chunks a `size`-byte file splits into.
pub fn chunk_count(size: u64, chunk_size: u64) -> Result<u64, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize);
    }
    Ok(size.div_ceil(chunk_size))
}

/// Splits a `size`-byte source into `ceil(size / chunk_size)` contiguous,
/// non-overlapping chunks covering `[0, size)`.
///
/// Every chunk is `chunk_size` long except possibly the last.
pub fn split(
    key: &ContentKey,
    size: u64,
    chunk_size: u64,
) -> Result<Vec<ChunkDescriptor>, TransferError> {
    let count = chunk_count(size, chunk_size)?;
    Ok((0..count)
        .map(|index| {
            let start = index * chunk_size;
            ChunkDescriptor {
                index,
                start,
                end: start.saturating_add(chunk_size).min(size),
                name: key.chunk_name(index),
            }
        })
        .collect())
}

/// Opens `path` and returns a reader yielding exactly the bytes of `range`.
pub async fn open_range(
    path: &Path,
    range: Range<u64>,
) -> Result<tokio::io::Take<tokio::fs::File>, TransferError> {
    let mut file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    if range.start > range.end || range.end > size {
        return Err(TransferError::RangeOutOfBounds {
            start: range.start,
            end: range.end,
            size,
        });
    }
    file.seek(SeekFrom::Start(range.start)).await?;
    Ok(file.take(range.end - range.start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn key() -> ContentKey {
        ContentKey::new("abc123", "mp4").unwrap()
    }

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn split_uneven_size() {
        let chunks = split(&key(), 10, 4).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].range(), 0..4);
        assert_eq!(chunks[1].range(), 4..8);
        assert_eq!(chunks[2].range(), 8..10);
        assert_eq!(chunks[2].name, "abc123.mp4.part2");
    }

    #[test]
    fn split_exact_multiple() {
        let chunks = split(&key(), 12, 4).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() == 4));
    }

    #[test]
    fn split_scenario_250_by_100() {
        const MIB: u64 = 1024 * 1024;
        let chunks = split(&key(), 250 * MIB, 100 * MIB).unwrap();
        let sizes: Vec<u64> = chunks.iter().map(ChunkDescriptor::len).collect();
        assert_eq!(sizes, vec![100 * MIB, 100 * MIB, 50 * MIB]);
    }

    #[test]
    fn split_covers_range_without_gaps() {
        for (size, chunk_size) in [(1, 1), (7, 3), (100, 7), (1000, 1000), (1001, 1000)] {
            let chunks = split(&key(), size, chunk_size).unwrap();
            assert_eq!(chunks.len() as u64, size.div_ceil(chunk_size));
            assert_eq!(chunks.first().unwrap().start, 0);
            assert_eq!(chunks.last().unwrap().end, size);
            for pair in chunks.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
                assert_eq!(pair[0].len(), chunk_size);
            }
            for (i, c) in chunks.iter().enumerate() {
                assert_eq!(c.index, i as u64);
                assert!(!c.is_empty());
            }
        }
    }

    #[test]
    fn split_empty_file_has_no_chunks() {
        assert!(split(&key(), 0, 4).unwrap().is_empty());
    }

    #[test]
    fn split_rejects_zero_chunk_size() {
        assert!(matches!(
            split(&key(), 10, 0),
            Err(TransferError::InvalidChunkSize)
        ));
    }

    #[test]
    fn remaining_from_partial_and_complete() {
        let chunks = split(&key(), 250, 100).unwrap();
        assert_eq!(chunks[1].remaining_from(40), 140..200);
        assert_eq!(chunks[1].remaining_from(100), 200..200);
        assert_eq!(chunks[2].remaining_from(30), 230..250);
        // Over-reported lengths clamp to an empty suffix.
        assert!(chunks[2].remaining_from(80).is_empty());
    }

    #[tokio::test]
    async fn concatenated_ranges_reproduce_file() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 251) as u8).collect();
        let path = create_test_file(dir.path(), "src.mp4", &data);

        let mut rebuilt = Vec::new();
        for chunk in split(&key(), data.len() as u64, 64).unwrap() {
            let mut reader = open_range(&path, chunk.range()).await.unwrap();
            let n = reader.read_to_end(&mut rebuilt).await.unwrap();
            assert_eq!(n as u64, chunk.len());
        }
        assert_eq!(rebuilt, data);
    }

    #[tokio::test]
    async fn open_range_reads_suffix() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "src.mp4", b"0123456789");

        let mut reader = open_range(&path, 6..10).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"6789");
    }

    #[tokio::test]
    async fn open_range_rejects_out_of_bounds() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "src.mp4", b"0123");

        let result = open_range(&path, 2..9).await;
        assert!(matches!(
            result,
            Err(TransferError::RangeOutOfBounds { size: 4, .. })
        ));
    }
}
