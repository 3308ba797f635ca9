//! Bounded buffer of log records awaiting publication.

use crate::config::LogCapacity;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Buffered log records keyed by device-monotonic milliseconds.
pub type LogRecords = BTreeMap<u64, String>;

#[derive(Debug, Default)]
struct Records {
    entries: LogRecords,
    last_appended: Option<u64>,
}

/// An ordered, bounded accumulator of log records.
///
/// Records are ordered by key. When an insert leaves more than
/// [`LogCapacity::max`] records, the [`LogCapacity::trim`] oldest are evicted
/// in one pass. Eviction is the only way records are lost: anything taken for
/// publication and not written must be handed back with
/// [`LogBuffer::add_logs`].
///
/// # Invariants
///
/// - `len() <= capacity().max()` after every call
/// - Eviction removes the smallest keys first
#[derive(Debug)]
pub struct LogBuffer {
    capacity: LogCapacity,
    records: Mutex<Records>,
    evicted: AtomicU64,
}

impl LogBuffer {
    /// Creates an empty buffer.
    pub fn new(capacity: LogCapacity) -> Self {
        Self {
            capacity,
            records: Mutex::new(Records::default()),
            evicted: AtomicU64::new(0),
        }
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> LogCapacity {
        self.capacity
    }

    /// Inserts one record. A record already stored under `key` is replaced.
    pub fn add_log(&self, key: u64, message: impl Into<String>) {
        let evicted = {
            let mut records = self.records.lock();
            records.entries.insert(key, message.into());
            self.trim_if_over_capacity(&mut records.entries)
        };
        self.note_eviction(evicted);
    }

    /// Inserts many records, replacing any stored under the same keys.
    pub fn add_logs(&self, logs: impl IntoIterator<Item = (u64, String)>) {
        let evicted = {
            let mut records = self.records.lock();
            records.entries.extend(logs);
            self.trim_if_over_capacity(&mut records.entries)
        };
        self.note_eviction(evicted);
    }

    /// Appends a record captured at `now_ms` and returns the key used.
    ///
    /// Keys handed out by `append` strictly increase, so two records produced
    /// within the same millisecond do not replace each other.
    pub fn append(&self, now_ms: u64, message: impl Into<String>) -> u64 {
        let (key, evicted) = {
            let mut records = self.records.lock();
            let key = match records.last_appended {
                Some(last) if now_ms <= last => last.saturating_add(1),
                _ => now_ms,
            };
            records.last_appended = Some(key);
            records.entries.insert(key, message.into());
            (key, self.trim_if_over_capacity(&mut records.entries))
        };
        self.note_eviction(evicted);
        key
    }

    /// Removes and returns every buffered record.
    pub fn take_logs(&self) -> LogRecords {
        std::mem::take(&mut self.records.lock().entries)
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.records.lock().entries.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.records.lock().entries.is_empty()
    }

    /// Total records evicted by capacity trimming.
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn trim_if_over_capacity(&self, entries: &mut LogRecords) -> usize {
        let len = entries.len();
        if len <= self.capacity.max() {
            return 0;
        }
        // Whole trim passes, so a bulk insert cannot leave the buffer above max.
        let trim = self.capacity.trim();
        let to_remove = (len - self.capacity.max()).div_ceil(trim) * trim;
        let mut removed = 0;
        while removed < to_remove && entries.pop_first().is_some() {
            removed += 1;
        }
        removed
    }

    // Called after the lock is released: a tracing layer may feed this buffer.
    fn note_eviction(&self, evicted: usize) {
        if evicted > 0 {
            self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(evicted, "log buffer over capacity, dropped oldest records");
        }
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(LogCapacity::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn small() -> LogBuffer {
        LogBuffer::new(LogCapacity::new(5, 2).unwrap())
    }

    #[test]
    fn add_and_take() {
        let buffer = small();
        buffer.add_log(20, "second");
        buffer.add_log(10, "first");
        assert_eq!(buffer.len(), 2);

        let logs = buffer.take_logs();
        assert_eq!(
            logs.into_iter().collect::<Vec<_>>(),
            vec![(10, "first".to_string()), (20, "second".to_string())]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn same_key_overwrites() {
        let buffer = small();
        buffer.add_log(7, "old");
        buffer.add_log(7, "new");
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.take_logs()[&7], "new");
    }

    #[test]
    fn trims_oldest_in_one_pass() {
        let buffer = small();
        for key in 1..=5 {
            buffer.add_log(key, format!("m{key}"));
        }
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.evicted_count(), 0);

        buffer.add_log(6, "m6");
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.evicted_count(), 2);
        assert_eq!(
            buffer.take_logs().keys().copied().collect::<Vec<_>>(),
            vec![3, 4, 5, 6]
        );
    }

    #[test]
    fn add_logs_trims_in_whole_passes() {
        let buffer = small();
        buffer.add_logs((1..=6).map(|k| (k, format!("m{k}"))));
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.take_logs().keys().next(), Some(&3));

        // 8 records: two passes of 2 are needed to get back under 5.
        buffer.add_logs((1..=8).map(|k| (k, format!("m{k}"))));
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.evicted_count(), 6);
        assert_eq!(buffer.take_logs().keys().next(), Some(&5));
    }

    #[test]
    fn default_capacity_scenario() {
        let buffer = LogBuffer::default();
        for key in 0..1501u64 {
            buffer.add_log(key, "line");
        }
        assert_eq!(buffer.len(), 1201);

        let logs = buffer.take_logs();
        assert!((0..300).all(|key| !logs.contains_key(&key)));
        assert_eq!(logs.keys().next(), Some(&300));
    }

    #[test]
    fn append_never_collides() {
        let buffer = small();
        assert_eq!(buffer.append(100, "a"), 100);
        assert_eq!(buffer.append(100, "b"), 101);
        assert_eq!(buffer.append(99, "c"), 102);
        assert_eq!(buffer.append(200, "d"), 200);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn rebuffered_records_merge_in_order() {
        let buffer = small();
        buffer.add_log(50, "new");
        let mut failed = LogRecords::new();
        failed.insert(10, "old".to_string());
        buffer.add_logs(failed);
        assert_eq!(
            buffer.take_logs().keys().copied().collect::<Vec<_>>(),
            vec![10, 50]
        );
    }

    fn keys_of(buffer: &LogBuffer) -> Vec<u64> {
        let logs = buffer.take_logs();
        let keys = logs.keys().copied().collect();
        buffer.add_logs(logs);
        keys
    }

    /// Reference model: insert, then drop whole trim passes of the smallest keys.
    fn model_insert(model: &mut BTreeSet<u64>, keys: &[u64], capacity: LogCapacity) {
        model.extend(keys.iter().copied());
        while model.len() > capacity.max() {
            for _ in 0..capacity.trim() {
                model.pop_first();
            }
        }
    }

    proptest! {
        #[test]
        fn bulk_inserts_follow_trim_policy(
            batches in prop::collection::vec(
                prop::collection::btree_map(0u64..10_000, "[a-z]{0,8}", 0..30),
                1..40,
            ),
        ) {
            let capacity = LogCapacity::new(20, 5).unwrap();
            let buffer = LogBuffer::new(capacity);
            let mut model = BTreeSet::new();
            for batch in batches {
                let keys: Vec<u64> = batch.keys().copied().collect();
                buffer.add_logs(batch);
                model_insert(&mut model, &keys, capacity);

                prop_assert!(buffer.len() <= capacity.max());
                prop_assert_eq!(keys_of(&buffer), model.iter().copied().collect::<Vec<_>>());
            }
        }

        #[test]
        fn single_inserts_evict_smallest(keys in prop::collection::vec(any::<u64>(), 0..200)) {
            let capacity = LogCapacity::new(30, 7).unwrap();
            let buffer = LogBuffer::new(capacity);
            let mut model = BTreeSet::new();
            for key in keys {
                let before = keys_of(&buffer);
                buffer.add_log(key, "x");
                model_insert(&mut model, &[key], capacity);

                let after = keys_of(&buffer);
                prop_assert!(after.len() <= capacity.max());
                prop_assert_eq!(&after, &model.iter().copied().collect::<Vec<_>>());

                let removed: BTreeSet<u64> = before
                    .iter()
                    .copied()
                    .chain(std::iter::once(key))
                    .filter(|k| !model.contains(k))
                    .collect();
                if !removed.is_empty() {
                    prop_assert_eq!(removed.len(), capacity.trim());
                    let max_removed = removed.iter().max().copied().unwrap();
                    prop_assert!(after.iter().all(|k| *k > max_removed));
                }
            }
        }
    }
}
