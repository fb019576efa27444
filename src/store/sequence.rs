//! Per-day sequence numbers for binding integrity tokens

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDate;
use dashmap::DashMap;

use crate::error::{Result, StoreError};

const SNAPSHOT_FILE: &str = "sequences.json";

/// Monotonic counter keyed by calendar day
///
/// Increments go through `fetch_add` on the day's atomic, never a
/// read-modify-write of the stored value.
#[derive(Debug, Default)]
pub struct DailySequence {
    counters: DashMap<NaiveDate, AtomicU64>,
}

impl DailySequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next value for `day`, starting at 1
    pub fn next(&self, day: NaiveDate) -> u64 {
        if let Some(counter) = self.counters.get(&day) {
            return counter.fetch_add(1, Ordering::SeqCst) + 1;
        }
        self.counters
            .entry(day)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }

    pub fn current(&self, day: NaiveDate) -> u64 {
        self.counters
            .get(&day)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub async fn save_to(&self, dir: &Path) -> Result<()> {
        let snapshot: BTreeMap<NaiveDate, u64> = self
            .counters
            .iter()
            .map(|entry| (*entry.key(), entry.value().load(Ordering::SeqCst)))
            .collect();
        let json = serde_json::to_vec_pretty(&snapshot).map_err(snapshot_error)?;
        super::write_snapshot(dir, SNAPSHOT_FILE, json).await
    }

    pub async fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(SNAPSHOT_FILE);
        let sequence = Self::new();
        if !tokio::fs::try_exists(&path).await? {
            return Ok(sequence);
        }
        let raw = tokio::fs::read(&path).await?;
        let snapshot: BTreeMap<NaiveDate, u64> =
            serde_json::from_slice(&raw).map_err(snapshot_error)?;
        for (day, value) in snapshot {
            sequence.counters.insert(day, AtomicU64::new(value));
        }
        Ok(sequence)
    }
}

fn snapshot_error(e: serde_json::Error) -> StoreError {
    StoreError::Snapshot {
        table: "sequences".to_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, d).unwrap()
    }

    #[test]
    fn test_sequence_restarts_per_day() {
        let seq = DailySequence::new();
        assert_eq!(seq.next(day(1)), 1);
        assert_eq!(seq.next(day(1)), 2);
        assert_eq!(seq.next(day(2)), 1);
        assert_eq!(seq.current(day(1)), 2);
    }

    #[test]
    fn test_concurrent_increments_are_unique() {
        let seq = Arc::new(DailySequence::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = Arc::clone(&seq);
                std::thread::spawn(move || (0..250).map(|_| seq.next(day(3))).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                assert!(seen.insert(value), "duplicate sequence {}", value);
            }
        }
        assert_eq!(seen.len(), 2000);
        assert_eq!(seq.current(day(3)), 2000);
    }

    #[tokio::test]
    async fn test_snapshot_preserves_counters() {
        let dir = tempfile::tempdir().unwrap();
        let seq = DailySequence::new();
        seq.next(day(4));
        seq.next(day(4));
        seq.save_to(dir.path()).await.unwrap();

        let reloaded = DailySequence::load_from(dir.path()).await.unwrap();
        assert_eq!(reloaded.next(day(4)), 3);
    }
}
