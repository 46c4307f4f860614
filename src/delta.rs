//! Delta Processor: in-order per-key status transitions (§4.4).
//!
//! Deltas never create employees and never touch `lastSeenEpoch` — they
//! adjust `statusInOrg`/`presentInLatest` on an existing document.

use crate::error::StoreError;
use crate::model::Source;
use crate::status::{is_valid_email, normalize_email};
use crate::store::Store;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeltaType {
    Left,
    Inactive,
    Reactivated,
}

impl DeltaType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "left" => Some(DeltaType::Left),
            "inactive" => Some(DeltaType::Inactive),
            "reactivated" => Some(DeltaType::Reactivated),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DeltaMessage {
    pub email: String,
    pub delta_type: String,
    pub event_id: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeltaOutcome {
    pub processed: usize,
    pub skipped: usize,
}

pub struct DeltaProcessor {
    store: Arc<dyn Store>,
    concurrency: usize,
}

impl DeltaProcessor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_concurrency(store, 1)
    }

    /// `concurrency` bounds how many distinct keys may be in flight at once
    /// (`CONCURRENCY`, §4.4, §5). Deltas for the same email always apply in
    /// consumption order regardless of this setting.
    pub fn with_concurrency(store: Arc<dyn Store>, concurrency: usize) -> Self {
        Self { store, concurrency: concurrency.max(1) }
    }

    /// Apply one delta. Validates email and `deltaType`; skips (never
    /// errors) on an unknown employee, since deltas never create records.
    #[tracing::instrument(skip(self), fields(org_id))]
    pub async fn apply_one(
        &self,
        org_id: &str,
        delta: DeltaMessage,
        source: Source,
    ) -> Result<bool, StoreError> {
        let email = normalize_email(&delta.email);
        if email.is_empty() || !is_valid_email(&email) {
            tracing::warn!(org_id, email = %delta.email, "skipping delta: invalid email");
            return Ok(false);
        }
        let Some(delta_type) = DeltaType::parse(&delta.delta_type) else {
            tracing::warn!(org_id, delta_type = %delta.delta_type, "skipping delta: unknown deltaType");
            return Ok(false);
        };

        let Some(mut employee) = self.store.get_employee_by_email(org_id, &email).await? else {
            tracing::warn!(org_id, email, "skipping delta: no existing employee");
            return Ok(false);
        };

        let (status, present) = match delta_type {
            DeltaType::Left => (crate::model::Status::Left, false),
            DeltaType::Inactive => (crate::model::Status::Inactive, false),
            DeltaType::Reactivated => (crate::model::Status::Active, true),
        };

        employee.status_in_org = status;
        employee.present_in_latest = present;
        employee.updated_at = Utc::now();
        employee.source = source.as_delta();
        employee.last_event_id = delta.event_id;

        self.store.apply_employee_update(org_id, employee).await?;
        metrics::counter!("roster_deltas_applied_total").increment(1);
        Ok(true)
    }

    /// Apply a sequence of deltas, grouped by email so that deltas for the
    /// same key always apply in consumption order, with up to
    /// `maxInFlightRequests = CONCURRENCY` distinct keys in flight at once
    /// (§4.4, §5). `CONCURRENCY=1` (the default) recovers strict one-by-one
    /// application across the whole batch.
    pub async fn apply_many(
        &self,
        org_id: &str,
        deltas: Vec<DeltaMessage>,
        source: Source,
    ) -> Result<DeltaOutcome, StoreError> {
        let mut groups: HashMap<String, Vec<DeltaMessage>> = HashMap::new();
        let mut key_order: Vec<String> = Vec::new();
        for delta in deltas {
            let key = normalize_email(&delta.email);
            if !groups.contains_key(&key) {
                key_order.push(key.clone());
            }
            groups.entry(key).or_default().push(delta);
        }

        let results: Vec<Result<DeltaOutcome, StoreError>> = stream::iter(key_order)
            .map(|key| {
                let group = groups.remove(&key).unwrap_or_default();
                async move {
                    let mut outcome = DeltaOutcome::default();
                    for delta in group {
                        if self.apply_one(org_id, delta, source).await? {
                            outcome.processed += 1;
                        } else {
                            outcome.skipped += 1;
                        }
                    }
                    Ok(outcome)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut total = DeltaOutcome::default();
        for result in results {
            let outcome = result?;
            total.processed += outcome.processed;
            total.skipped += outcome.skipped;
        }
        Ok(total)
    }
}
