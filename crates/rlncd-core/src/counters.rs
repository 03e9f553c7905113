//! # Fire-and-forget diagnostic counters
//!
//! A single process-wide map from a free-form string key to a running
//! total, grouped by a caller-supplied prefix. Grounded in `counters.hpp`'s
//! `counters`/`counters_api` pair, with the original's cross-process shared
//! memory segment replaced by an in-process `Mutex<HashMap>` (this daemon
//! has no standalone `counters` reader process to share state with).

use std::collections::BTreeMap;
use std::sync::Mutex;

/// Process-wide counter table. Increment calls never fail and never block
/// on anything but the internal mutex; callers are not expected to check
/// a return value, matching the original's void `increment`.
#[derive(Default)]
pub struct Counters {
    table: Mutex<BTreeMap<String, u64>>,
}

impl Counters {
    pub fn new() -> Counters {
        Counters {
            table: Mutex::new(BTreeMap::new()),
        }
    }

    /// Bump `key` by one.
    pub fn increment(&self, key: &str) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        *table.entry(key.to_string()).or_insert(0) += 1;
    }

    /// Bump `key` by `by`.
    pub fn add(&self, key: &str, by: u64) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        *table.entry(key.to_string()).or_insert(0) += by;
    }

    /// Snapshot the table, sorted by key.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Log every counter at info level, one line each, sorted by key.
    pub fn log(&self) {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        for (key, value) in table.iter() {
            tracing::info!(counter = %key, value, "counter");
        }
    }
}

/// A named group of counters sharing a common prefix, mirroring
/// `counters_api::counters_group`/`counters_increment`. Each worker
/// (encoder slot, decoder slot) owns one of these, scoped to its own
/// group name, while sharing the same underlying [`Counters`] table.
pub struct CounterGroup {
    counters: std::sync::Arc<Counters>,
    group: String,
}

impl CounterGroup {
    pub fn new(counters: std::sync::Arc<Counters>, group: impl Into<String>) -> CounterGroup {
        CounterGroup {
            counters,
            group: group.into(),
        }
    }

    pub fn increment(&self, name: &str) {
        self.counters.increment(&format!("{} {}", self.group, name));
    }

    pub fn add(&self, name: &str, by: u64) {
        self.counters.add(&format!("{} {}", self.group, name), by);
    }
}
