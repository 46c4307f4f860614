//! Reconciler / Optimizer: the core convergence algorithm (§4.3).
//!
//! Deduplicates an upsert batch, resolves existing documents via a cached
//! chunked keyed lookup, writes in bounded-parallel batches, adapts batch
//! size to observed error rate, and trips a circuit breaker on sustained
//! failure.

use crate::cache::ReconcilerCache;
use crate::circuit::CircuitBreaker;
use crate::config::ReconcilerConfig;
use crate::error::{ReconcileError, StoreError};
use crate::model::{Employee, Source, Status};
use crate::status::{is_valid_email, normalize_email, normalize_status};
use crate::store::{EmployeeWrite, Store};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One row of an upsert invocation (§6.1, §6.2).
#[derive(Clone, Debug)]
pub struct UpsertMessage {
    pub email: String,
    pub status_in_org: Option<String>,
    pub event_id: Option<String>,
}

/// Result counts returned to the HTTP caller (§4.3 invocation contract).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
}

struct PreparedEntry {
    email: String,
    status: Status,
    event_id: Option<String>,
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    cache: Arc<ReconcilerCache>,
    circuit: Arc<CircuitBreaker>,
    config: ReconcilerConfig,
    current_batch_size: AtomicUsize,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<ReconcilerCache>,
        circuit: Arc<CircuitBreaker>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            cache,
            circuit,
            current_batch_size: AtomicUsize::new(config.firestore_batch_size),
            config,
        }
    }

    pub fn current_batch_size(&self) -> usize {
        self.current_batch_size.load(Ordering::Acquire)
    }

    /// Reconcile a batch of upserts for one organization and one epoch.
    #[tracing::instrument(skip(self, messages), fields(org_id, epoch, rows = messages.len()))]
    pub async fn reconcile(
        &self,
        org_id: &str,
        messages: Vec<UpsertMessage>,
        epoch: u64,
        source: Source,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if !self.circuit.allow_request() {
            tracing::warn!(org_id, "circuit open, refusing invocation");
            return Err(ReconcileError::CircuitOpen);
        }

        let (prepared, skipped) = validate_and_dedup(messages);

        if prepared.is_empty() {
            // Nothing to write; this invocation is trivially successful and
            // must not move the circuit breaker or adaptive batch size.
            return Ok(ReconcileOutcome {
                processed: 0,
                skipped,
                errors: 0,
            });
        }

        let resolved = match self.resolve_existing(org_id, &prepared).await {
            Ok(r) => r,
            Err(e) => {
                self.circuit.record(true);
                return Err(e.into());
            }
        };

        let now = Utc::now();
        let writes: Vec<EmployeeWrite> = prepared
            .iter()
            .map(|entry| match resolved.get(&entry.email) {
                Some(existing) => {
                    let mut emp = existing.clone();
                    emp.status_in_org = entry.status;
                    emp.present_in_latest = true;
                    emp.last_seen_epoch = epoch;
                    emp.updated_at = now;
                    emp.source = source;
                    emp.last_event_id = entry.event_id.clone();
                    EmployeeWrite::Existing(emp)
                }
                None => EmployeeWrite::New(Employee::new_upsert(
                    uuid::Uuid::new_v4().to_string(),
                    org_id.to_string(),
                    entry.email.clone(),
                    entry.status,
                    epoch,
                    now,
                    source,
                    entry.event_id.clone(),
                )),
            })
            .collect();

        let (processed, errors) = self.write_batches(org_id, writes).await;

        let total = processed + errors;
        let error_rate = if total == 0 { 0.0 } else { errors as f64 / total as f64 };
        self.adapt_batch_size(error_rate);
        self.circuit.record(errors > 0);

        metrics::counter!("roster_rows_processed_total").increment(processed as u64);
        metrics::counter!("roster_rows_skipped_total").increment(skipped as u64);
        metrics::counter!("roster_rows_errored_total").increment(errors as u64);
        metrics::gauge!("roster_reconciler_batch_size").set(self.current_batch_size() as f64);

        Ok(ReconcileOutcome {
            processed,
            skipped,
            errors,
        })
    }

    async fn resolve_existing(
        &self,
        org_id: &str,
        prepared: &[PreparedEntry],
    ) -> Result<HashMap<String, Employee>, StoreError> {
        let mut resolved = HashMap::with_capacity(prepared.len());
        let mut misses = Vec::new();

        for entry in prepared {
            match self.cache.get(org_id, &entry.email) {
                Some(emp) => {
                    resolved.insert(entry.email.clone(), emp);
                }
                None => misses.push(entry.email.clone()),
            }
        }

        if misses.is_empty() {
            return Ok(resolved);
        }

        let chunks: Vec<Vec<String>> = misses
            .chunks(self.config.query_chunk_size)
            .map(|c| c.to_vec())
            .collect();

        let store = self.store.clone();
        let results: Vec<Result<HashMap<String, Employee>, StoreError>> = stream::iter(chunks)
            .map(|chunk| {
                let store = store.clone();
                let org_id = org_id.to_string();
                async move { store.get_employees_by_email(&org_id, &chunk).await }
            })
            .buffer_unordered(self.config.max_parallel_batches)
            .collect()
            .await;

        for result in results {
            let found = result?;
            for (email, emp) in found {
                self.cache.put(org_id, &email, emp.clone());
                resolved.insert(email, emp);
            }
        }

        Ok(resolved)
    }

    async fn write_batches(&self, org_id: &str, writes: Vec<EmployeeWrite>) -> (usize, usize) {
        let batch_size = self.current_batch_size().max(1);
        let groups: Vec<Vec<EmployeeWrite>> = writes
            .chunks(batch_size)
            .map(|c| c.to_vec())
            .collect();

        let store = self.store.clone();
        let results: Vec<(usize, Result<(), StoreError>)> = stream::iter(groups)
            .map(|group| {
                let store = store.clone();
                let org_id = org_id.to_string();
                async move {
                    let count = group.len();
                    let result = store.commit_batch(&org_id, group).await;
                    (count, result)
                }
            })
            .buffer_unordered(self.config.max_parallel_batches)
            .collect()
            .await;

        let mut processed = 0;
        let mut errors = 0;
        for (count, result) in results {
            match result {
                Ok(()) => processed += count,
                Err(e) => {
                    tracing::error!(org_id, error = %e, "batch commit failed");
                    errors += count;
                }
            }
        }
        (processed, errors)
    }

    fn adapt_batch_size(&self, error_rate: f64) {
        let current = self.current_batch_size();
        let next = if error_rate > self.config.adaptive_batch_threshold {
            (current as f64 * 0.7).floor().max(100.0) as usize
        } else if error_rate < 0.05 && current < 500 {
            ((current as f64 * 1.2).floor() as usize).min(500)
        } else {
            current
        };
        if next != current {
            tracing::info!(from = current, to = next, error_rate, "adapted batch size");
        }
        self.current_batch_size.store(next, Ordering::Release);
    }
}

/// Validate and normalize every row, then deduplicate by email keeping the
/// last occurrence in input order (§4.3 step 1, §8 invariant 4/7).
fn validate_and_dedup(messages: Vec<UpsertMessage>) -> (Vec<PreparedEntry>, usize) {
    let mut skipped = 0;
    let mut last_index: HashMap<String, usize> = HashMap::new();
    let mut normalized: Vec<(String, Status, Option<String>)> = Vec::with_capacity(messages.len());

    for msg in messages {
        let email = normalize_email(&msg.email);
        if email.is_empty() || !is_valid_email(&email) {
            skipped += 1;
            continue;
        }
        let status = normalize_status(msg.status_in_org.as_deref());
        let idx = normalized.len();
        last_index.insert(email.clone(), idx);
        normalized.push((email, status, msg.event_id));
    }

    // Walking in reverse and keeping only the first-seen-from-the-end
    // occurrence is equivalent to keeping the last occurrence in original
    // order; `last_index` already records exactly that index per email.
    let mut prepared: Vec<PreparedEntry> = Vec::with_capacity(last_index.len());
    let mut seen = std::collections::HashSet::new();
    for (idx, (email, status, event_id)) in normalized.into_iter().enumerate().rev() {
        if last_index.get(&email) == Some(&idx) && seen.insert(email.clone()) {
            prepared.push(PreparedEntry { email, status, event_id });
        }
    }
    prepared.reverse();

    (prepared, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ReconcilerCache;
    use crate::circuit::CircuitBreaker;
    use crate::config::Config;
    use crate::store::InMemoryStore;

    fn build() -> (Reconciler, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let cfg = Config::for_tests().reconciler;
        let cache = Arc::new(ReconcilerCache::new(cfg.cache_ttl, cfg.max_cache_size_mb));
        let circuit = Arc::new(CircuitBreaker::new(cfg.error_threshold, cfg.circuit_reset));
        (Reconciler::new(store.clone(), cache, circuit, cfg), store)
    }

    fn msg(email: &str, status: &str) -> UpsertMessage {
        UpsertMessage {
            email: email.to_string(),
            status_in_org: Some(status.to_string()),
            event_id: Some("evt-1".to_string()),
        }
    }

    #[tokio::test]
    async fn fresh_snapshot_creates_three_employees() {
        let (rec, store) = build();
        let outcome = rec
            .reconcile(
                "acme",
                vec![
                    msg("alice@x.com", "active"),
                    msg("bob@x.com", "active"),
                    msg("charlie@x.com", "terminated"),
                ],
                1,
                Source::KafkaUpsert,
            )
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome { processed: 3, skipped: 0, errors: 0 });

        let charlie = store.get_employee_by_email("acme", "charlie@x.com").await.unwrap().unwrap();
        assert_eq!(charlie.status_in_org, Status::Left);
        assert!(charlie.present_in_latest);
        assert_eq!(charlie.last_seen_epoch, 1);
    }

    #[tokio::test]
    async fn duplicate_email_in_one_batch_keeps_last_occurrence() {
        let (rec, store) = build();
        let outcome = rec
            .reconcile(
                "acme",
                vec![msg("bob@x.com", "active"), msg("bob@x.com", "on leave")],
                1,
                Source::KafkaUpsert,
            )
            .await
            .unwrap();

        assert_eq!(outcome.processed, 1);
        let bob = store.get_employee_by_email("acme", "bob@x.com").await.unwrap().unwrap();
        assert_eq!(bob.status_in_org, Status::Inactive);
    }

    #[tokio::test]
    async fn invalid_rows_are_skipped_not_fatal() {
        let (rec, _store) = build();
        let outcome = rec
            .reconcile(
                "acme",
                vec![msg("not-an-email", "active"), msg("valid@x.com", "active")],
                1,
                Source::KafkaUpsert,
            )
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome { processed: 1, skipped: 1, errors: 0 });
    }

    #[tokio::test]
    async fn empty_input_is_a_trivial_success() {
        let (rec, _store) = build();
        let outcome = rec.reconcile("acme", vec![], 1, Source::KafkaUpsert).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::default());
    }

    #[tokio::test]
    async fn second_epoch_updates_last_seen_epoch() {
        let (rec, store) = build();
        rec.reconcile("acme", vec![msg("alice@x.com", "active")], 1, Source::KafkaUpsert)
            .await
            .unwrap();
        rec.reconcile("acme", vec![msg("alice@x.com", "active")], 2, Source::KafkaUpsert)
            .await
            .unwrap();

        let alice = store.get_employee_by_email("acme", "alice@x.com").await.unwrap().unwrap();
        assert_eq!(alice.last_seen_epoch, 2);
    }

    #[tokio::test]
    async fn circuit_open_refuses_invocation() {
        let (rec, _store) = build();
        rec.circuit.record(true);
        rec.circuit.record(true); // 2/2 failures > 0.3 threshold -> open

        let result = rec.reconcile("acme", vec![msg("a@x.com", "active")], 1, Source::KafkaUpsert).await;
        assert!(matches!(result, Err(ReconcileError::CircuitOpen)));
    }

    #[test]
    fn adapt_batch_size_shrinks_on_high_error_rate_and_grows_on_low() {
        let cfg = Config::for_tests().reconciler;
        let cache = Arc::new(ReconcilerCache::new(cfg.cache_ttl, cfg.max_cache_size_mb));
        let circuit = Arc::new(CircuitBreaker::new(cfg.error_threshold, cfg.circuit_reset));
        let store = Arc::new(InMemoryStore::new());
        let rec = Reconciler::new(store, cache, circuit, cfg);

        rec.adapt_batch_size(0.9);
        assert_eq!(rec.current_batch_size(), 350); // 500 * 0.7

        rec.current_batch_size.store(100, Ordering::Release);
        rec.adapt_batch_size(0.0);
        assert_eq!(rec.current_batch_size(), 120); // 100 * 1.2

        rec.current_batch_size.store(480, Ordering::Release);
        rec.adapt_batch_size(0.0);
        assert_eq!(rec.current_batch_size(), 500); // capped at 500

        rec.current_batch_size.store(100, Ordering::Release);
        rec.adapt_batch_size(0.95);
        assert_eq!(rec.current_batch_size(), 100); // floored at 100, not 70
    }
}
