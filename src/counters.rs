//! Distribution counter store.
//!
//! For each counter key this tracks a per-participant hit count plus a
//! derived histogram (hit count → number of participants with that count).
//! The histogram lets reporting read an entire conversion distribution in
//! one round-trip instead of scanning every participant.
//!
//! Every operation fails soft: a backend connection or protocol error is
//! logged and degraded to the documented zero/empty result. An unavailable
//! counter store must never take request handling down with it.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::constants::RESET_BATCH_SIZE;
use crate::metrics;
use crate::store::{CounterBackend, StoreError};

const PARTICIPANTS_NS: &str = "experiments:participants:";
const FREQ_NS: &str = "experiments:freq:";

/// Concurrent per-key-per-participant counters with derived histograms
#[derive(Clone)]
pub struct Counters {
    backend: Arc<dyn CounterBackend>,
}

impl Counters {
    pub fn new(backend: Arc<dyn CounterBackend>) -> Self {
        Self { backend }
    }

    fn participants_key(key: &str) -> String {
        format!("{PARTICIPANTS_NS}{key}")
    }

    fn freq_key(key: &str) -> String {
        format!("{FREQ_NS}{key}")
    }

    fn degraded(op: &str, err: &StoreError) {
        metrics::COUNTER_STORE_FAILURES.inc();
        tracing::warn!(op, error = %err, "counter store unavailable, degrading");
    }

    /// Add `count` to the participant's bucket under `key` and move the
    /// participant between histogram buckets. No-op when `count == 0`.
    ///
    /// The old-bucket decrement and new-bucket increment are two separate
    /// atomic operations; a concurrent `clear` can transiently drive a
    /// histogram frequency negative. Reads filter those out.
    pub fn increment(&self, key: &str, participant_id: &str, count: i64) {
        if count == 0 {
            return;
        }
        let new_total = match self
            .backend
            .hash_increment(&Self::participants_key(key), participant_id, count)
        {
            Ok(total) => total,
            Err(e) => {
                Self::degraded("increment", &e);
                return;
            }
        };

        let freq_key = Self::freq_key(key);
        if new_total > count {
            let prior = new_total - count;
            if let Err(e) = self.backend.hash_increment(&freq_key, &prior.to_string(), -1) {
                Self::degraded("increment", &e);
            }
        }
        if let Err(e) = self
            .backend
            .hash_increment(&freq_key, &new_total.to_string(), 1)
        {
            Self::degraded("increment", &e);
        }
    }

    /// Drop the participant's bucket under `key` and decrement the matching
    /// histogram frequency. No-op for a participant with no entry.
    pub fn clear(&self, key: &str, participant_id: &str) {
        let participants_key = Self::participants_key(key);
        let current = match self.backend.hash_get(&participants_key, participant_id) {
            Ok(Some(value)) => value,
            Ok(None) => return,
            Err(e) => {
                Self::degraded("clear", &e);
                return;
            }
        };
        if let Err(e) = self.backend.hash_remove(&participants_key, participant_id) {
            Self::degraded("clear", &e);
            return;
        }
        if let Err(e) =
            self.backend
                .hash_increment(&Self::freq_key(key), &current.to_string(), -1)
        {
            Self::degraded("clear", &e);
        }
    }

    /// Number of distinct participants with an entry under `key`
    /// (cardinality, not the sum of their counts).
    pub fn get(&self, key: &str) -> u64 {
        match self.backend.hash_len(&Self::participants_key(key)) {
            Ok(len) => len,
            Err(e) => {
                Self::degraded("get", &e);
                0
            }
        }
    }

    /// The participant's current count under `key`, 0 if absent
    pub fn get_frequency(&self, key: &str, participant_id: &str) -> i64 {
        match self.backend.hash_get(&Self::participants_key(key), participant_id) {
            Ok(value) => value.unwrap_or(0),
            Err(e) => {
                Self::degraded("get_frequency", &e);
                0
            }
        }
    }

    /// Full histogram for `key`: count value → number of participants.
    ///
    /// Non-positive frequencies (transient artifacts of concurrent
    /// increment/clear interleavings) are filtered out here rather than
    /// surfaced.
    pub fn get_frequencies(&self, key: &str) -> BTreeMap<u64, u64> {
        let pairs = match self.backend.hash_all(&Self::freq_key(key)) {
            Ok(pairs) => pairs,
            Err(e) => {
                Self::degraded("get_frequencies", &e);
                return BTreeMap::new();
            }
        };
        pairs
            .into_iter()
            .filter_map(|(value, freq)| {
                let value: u64 = value.parse().ok()?;
                if freq > 0 {
                    Some((value, freq as u64))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Delete both the per-participant map and the histogram for `key`
    pub fn reset(&self, key: &str) {
        let keys = vec![Self::participants_key(key), Self::freq_key(key)];
        if let Err(e) = self.backend.delete(&keys) {
            Self::degraded("reset", &e);
        }
    }

    /// Delete every counter whose key starts with `prefix`, in batches of
    /// [`RESET_BATCH_SIZE`] to bound round-trip size for large experiments.
    pub fn reset_pattern(&self, prefix: &str) {
        for namespace in [PARTICIPANTS_NS, FREQ_NS] {
            let keys = match self.backend.keys_with_prefix(&format!("{namespace}{prefix}")) {
                Ok(keys) => keys,
                Err(e) => {
                    Self::degraded("reset_pattern", &e);
                    return;
                }
            };
            for batch in keys.chunks(RESET_BATCH_SIZE) {
                if let Err(e) = self.backend.delete(batch) {
                    Self::degraded("reset_pattern", &e);
                    return;
                }
            }
        }
    }
}
