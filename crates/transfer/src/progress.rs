use std::collections::BTreeMap;

/// Progress report emitted by a single chunk transfer.
///
/// Byte counts are relative to the whole chunk range, so a resumed chunk
/// starts at its server-confirmed length rather than at zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub chunk_name: String,
    pub bytes_sent: u64,
    pub bytes_total: u64,
}

/// Aggregate view of an upload wave.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Arithmetic mean of per-chunk percentages (0..=100).
    ///
    /// Every chunk weighs the same, including a short last chunk.
    pub percent: f64,
    /// Byte-weighted percentage (0..=100).
    pub weighted_percent: f64,
    pub bytes_sent: u64,
    pub bytes_total: u64,
    pub chunks_complete: usize,
    pub chunks_total: usize,
}

#[derive(Debug, Clone, Copy)]
struct ChunkProgress {
    sent: u64,
    total: u64,
}

impl ChunkProgress {
    fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.sent.min(self.total) as f64 / self.total as f64) * 100.0
    }

    fn is_complete(&self) -> bool {
        self.sent >= self.total
    }
}

/// Pure reducer over [`ProgressEvent`]s.
///
/// Holds no channels or callbacks; the owner feeds it events and reads back
/// snapshots.
#[derive(Debug, Clone, Default)]
pub struct ProgressAggregator {
    chunks: BTreeMap<String, ChunkProgress>,
}

impl ProgressAggregator {
    /// Creates an aggregator for the given `(chunk_name, chunk_len)` pairs,
    /// all at zero progress.
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        Self {
            chunks: chunks
                .into_iter()
                .map(|(name, total)| (name.into(), ChunkProgress { sent: 0, total }))
                .collect(),
        }
    }

    /// Applies one event and returns the updated snapshot.
    ///
    /// Events for unknown chunks register them.
    pub fn apply(&mut self, event: &ProgressEvent) -> ProgressSnapshot {
        let entry = self
            .chunks
            .entry(event.chunk_name.clone())
            .or_insert(ChunkProgress {
                sent: 0,
                total: event.bytes_total,
            });
        entry.total = event.bytes_total;
        entry.sent = event.bytes_sent.min(event.bytes_total);
        self.snapshot()
    }

    /// Folds a sequence of events.
    pub fn apply_all<'a, I>(&mut self, events: I) -> ProgressSnapshot
    where
        I: IntoIterator<Item = &'a ProgressEvent>,
    {
        for event in events {
            self.apply(event);
        }
        self.snapshot()
    }

    /// Last known percentage of a single chunk.
    pub fn chunk_percent(&self, chunk_name: &str) -> Option<f64> {
        self.chunks.get(chunk_name).map(ChunkProgress::percent)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let chunks_total = self.chunks.len();
        let bytes_sent: u64 = self.chunks.values().map(|c| c.sent).sum();
        let bytes_total: u64 = self.chunks.values().map(|c| c.total).sum();

        let percent = if chunks_total == 0 {
            100.0
        } else {
            self.chunks.values().map(ChunkProgress::percent).sum::<f64>() / chunks_total as f64
        };
        let weighted_percent = if bytes_total == 0 {
            100.0
        } else {
            bytes_sent as f64 / bytes_total as f64 * 100.0
        };

        ProgressSnapshot {
            percent,
            weighted_percent,
            bytes_sent,
            bytes_total,
            chunks_complete: self.chunks.values().filter(|c| c.is_complete()).count(),
            chunks_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, sent: u64, total: u64) -> ProgressEvent {
        ProgressEvent {
            chunk_name: name.into(),
            bytes_sent: sent,
            bytes_total: total,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn fresh_aggregator_is_zero() {
        let agg = ProgressAggregator::new([("p0", 100u64), ("p1", 100)]);
        let snap = agg.snapshot();
        assert!(close(snap.percent, 0.0));
        assert_eq!(snap.chunks_total, 2);
        assert_eq!(snap.chunks_complete, 0);
        assert_eq!(snap.bytes_total, 200);
    }

    #[test]
    fn mean_is_not_size_weighted() {
        // Two full-size chunks and a short last chunk.
        let mut agg = ProgressAggregator::new([("p0", 100u64), ("p1", 100), ("p2", 10)]);
        let snap = agg.apply(&event("p2", 10, 10));

        assert!(close(snap.percent, 100.0 / 3.0));
        assert!(close(snap.weighted_percent, 10.0 / 210.0 * 100.0));
        assert_eq!(snap.chunks_complete, 1);
    }

    #[test]
    fn later_events_replace_earlier() {
        let mut agg = ProgressAggregator::new([("p0", 100u64)]);
        agg.apply(&event("p0", 30, 100));
        let snap = agg.apply(&event("p0", 70, 100));
        assert!(close(snap.percent, 70.0));
        assert_eq!(agg.chunk_percent("p0"), Some(70.0));
    }

    #[test]
    fn overshoot_is_clamped() {
        let mut agg = ProgressAggregator::default();
        let snap = agg.apply(&event("p0", 150, 100));
        assert!(close(snap.percent, 100.0));
        assert_eq!(snap.bytes_sent, 100);
    }

    #[test]
    fn apply_all_folds_in_order() {
        let events = vec![
            event("p0", 50, 100),
            event("p1", 100, 100),
            event("p0", 100, 100),
        ];
        let mut agg = ProgressAggregator::new([("p0", 100u64), ("p1", 100)]);
        let snap = agg.apply_all(&events);
        assert!(close(snap.percent, 100.0));
        assert_eq!(snap.chunks_complete, 2);
    }

    #[test]
    fn empty_upload_is_complete() {
        let agg = ProgressAggregator::default();
        let snap = agg.snapshot();
        assert!(close(snap.percent, 100.0));
        assert!(close(snap.weighted_percent, 100.0));
    }

    #[test]
    fn unknown_chunk_reports_none() {
        let agg = ProgressAggregator::default();
        assert_eq!(agg.chunk_percent("missing"), None);
    }
}
