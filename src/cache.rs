//! Reconciler lookup cache: TTL expiry on read, size-bounded eviction of
//! least-recently-populated entries on write (§4.3 step 2, §5).

use crate::model::Employee;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

type Key = (String, String); // (org_id, email)

struct Entry {
    employee: Employee,
    inserted_at: Instant,
    seq: u64,
    size_bytes: usize,
}

struct Inner {
    entries: HashMap<Key, Entry>,
    insertion_order: VecDeque<(u64, Key)>,
    total_bytes: usize,
    next_seq: u64,
}

/// Process-wide singleton cache, constructed once at startup and shared
/// across reconciler invocations (§9 design note).
pub struct ReconcilerCache {
    inner: parking_lot::Mutex<Inner>,
    ttl: Duration,
    max_bytes: usize,
}

impl ReconcilerCache {
    pub fn new(ttl: Duration, max_size_mb: usize) -> Self {
        Self {
            inner: parking_lot::Mutex::new(Inner {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
                total_bytes: 0,
                next_seq: 0,
            }),
            ttl,
            max_bytes: max_size_mb * 1024 * 1024,
        }
    }

    /// Look up a cached resolution. Expired entries (age >= TTL) are
    /// treated as a miss and evicted immediately.
    pub fn get(&self, org_id: &str, email: &str) -> Option<Employee> {
        let key = (org_id.to_string(), email.to_string());
        let mut inner = self.inner.lock();

        let Some(entry) = inner.entries.get(&key) else {
            metrics::counter!("roster_cache_miss_total").increment(1);
            return None;
        };

        if entry.inserted_at.elapsed() >= self.ttl {
            let size = entry.size_bytes;
            inner.entries.remove(&key);
            inner.total_bytes -= size;
            metrics::counter!("roster_cache_miss_total").increment(1);
            return None;
        }

        metrics::counter!("roster_cache_hit_total").increment(1);
        Some(entry.employee.clone())
    }

    /// Populate the cache with a freshly resolved employee, evicting
    /// least-recently-populated entries if the size budget is exceeded.
    pub fn put(&self, org_id: &str, email: &str, employee: Employee) {
        let size_bytes = serde_json::to_vec(&employee).map(|b| b.len()).unwrap_or(256);
        let key = (org_id.to_string(), email.to_string());

        let mut inner = self.inner.lock();
        if let Some(old) = inner.entries.remove(&key) {
            inner.total_bytes -= old.size_bytes;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.total_bytes += size_bytes;
        inner.entries.insert(
            key.clone(),
            Entry {
                employee,
                inserted_at: Instant::now(),
                seq,
                size_bytes,
            },
        );
        inner.insertion_order.push_back((seq, key));

        while inner.total_bytes > self.max_bytes {
            let Some((seq, key)) = inner.insertion_order.pop_front() else {
                break;
            };
            // Skip stale queue entries superseded by a later `put` for the same key.
            if let Some(entry) = inner.entries.get(&key) {
                if entry.seq == seq {
                    inner.total_bytes -= entry.size_bytes;
                    inner.entries.remove(&key);
                    metrics::counter!("roster_cache_evicted_total").increment(1);
                }
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}
