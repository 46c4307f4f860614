//! Batching Bridge: groups partitioned upsert messages into size/time
//! bounded HTTP batches with idempotent retry (§4.2).

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::retry::{JitterMode, RetryConfig};
use crate::status::normalize_email;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// One row within an upsert message (§6.2).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpsertRow {
    pub email: String,
    #[serde(rename = "statusInOrg")]
    pub status_in_org: Option<String>,
}

/// A raw message from the partitioned event source, before validation.
#[derive(Clone, Debug, Deserialize)]
pub struct IncomingMessage {
    #[serde(rename = "orgId")]
    pub org_id: Option<String>,
    #[serde(rename = "eventId")]
    pub event_id: Option<String>,
    pub rows: Option<serde_json::Value>,
}

/// Delivers a flushed batch to the reconciler over HTTP. Abstracted behind
/// a trait so the bridge's batching/retry logic is testable without a live
/// server (§1 scope note: the transport itself is an external collaborator).
#[async_trait]
pub trait BatchTransport: Send + Sync {
    async fn send(&self, org_id: &str, event_id: &str, rows: &[UpsertRow]) -> Result<u16, BridgeError>;
}

/// Live HTTP transport: POST with keep-alive, `X-Auth`, and the body shape
/// of §4.2.
pub struct HttpBatchTransport {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpBatchTransport {
    pub fn new(base_url: String, token: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, base_url, token })
    }
}

#[async_trait]
impl BatchTransport for HttpBatchTransport {
    async fn send(&self, org_id: &str, event_id: &str, rows: &[UpsertRow]) -> Result<u16, BridgeError> {
        #[derive(Serialize)]
        struct Body<'a> {
            #[serde(rename = "orgId")]
            org_id: &'a str,
            messages: &'a [UpsertRow],
        }

        let url = format!("{}/ingest/kafka/upserts", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-Auth", &self.token)
            .query(&[("orgId", org_id), ("eventId", event_id)])
            .json(&Body { org_id, messages: rows })
            .send()
            .await?;

        Ok(resp.status().as_u16())
    }
}

struct PendingBatch {
    org_id: String,
    event_id: String,
    rows: Vec<UpsertRow>,
    created_at: Instant,
}

type BatchKey = (String, String);

/// Groups rows by `(orgId, eventId)` and flushes size/time bounded batches
/// to a [`BatchTransport`], with exponential-backoff-and-jitter retry.
pub struct Bridge {
    batches: parking_lot::Mutex<HashMap<BatchKey, PendingBatch>>,
    transport: Arc<dyn BatchTransport>,
    config: BridgeConfig,
    retry: RetryConfig,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BridgeStats {
    pub accepted_rows: usize,
    pub skipped_messages: usize,
}

impl Bridge {
    pub fn new(transport: Arc<dyn BatchTransport>, config: BridgeConfig) -> Self {
        let retry = RetryConfig {
            initial_backoff: config.retry_base,
            max_backoff: config.retry_max,
            multiplier: 2.0,
            max_retries: config.max_retries,
            jitter: JitterMode::PlusMinus20,
        };
        Self {
            batches: parking_lot::Mutex::new(HashMap::new()),
            transport,
            config,
            retry,
        }
    }

    /// Validate and absorb one incoming message into its `(orgId, eventId)`
    /// batch, flushing immediately if the row-count trigger is hit.
    /// Malformed messages are logged and skipped, never fatal (§4.2, §6.2).
    pub async fn ingest(&self, message: IncomingMessage) -> BridgeStats {
        let (Some(org_id), Some(event_id)) = (message.org_id, message.event_id) else {
            tracing::warn!("skipping message: missing orgId or eventId");
            return BridgeStats { accepted_rows: 0, skipped_messages: 1 };
        };

        let rows: Vec<UpsertRow> = match message.rows {
            Some(serde_json::Value::Array(arr)) => arr
                .into_iter()
                .filter_map(|v| serde_json::from_value::<UpsertRow>(v).ok())
                .map(|mut r| {
                    r.email = normalize_email(&r.email);
                    r
                })
                .collect(),
            _ => {
                tracing::warn!(org_id, event_id, "skipping message: rows is not an array");
                return BridgeStats { accepted_rows: 0, skipped_messages: 1 };
            }
        };

        if rows.is_empty() {
            tracing::warn!(org_id, event_id, "skipping message: empty rows");
            return BridgeStats { accepted_rows: 0, skipped_messages: 1 };
        }

        let accepted = rows.len();
        let should_flush = {
            let mut batches = self.batches.lock();
            let key = (org_id.clone(), event_id.clone());
            let batch = batches.entry(key).or_insert_with(|| PendingBatch {
                org_id: org_id.clone(),
                event_id: event_id.clone(),
                rows: Vec::new(),
                created_at: Instant::now(),
            });
            batch.rows.extend(rows);
            batch.rows.len() >= self.config.batch_max_rows
        };

        if should_flush {
            self.flush_key(&(org_id, event_id)).await;
        }

        BridgeStats { accepted_rows: accepted, skipped_messages: 0 }
    }

    /// Sweep all batches whose age has reached `BATCH_MAX_MS`, flushing
    /// each. Intended to be called from a periodic timer task (§4.2).
    pub async fn sweep_aged_batches(&self) {
        let keys: Vec<BatchKey> = {
            let batches = self.batches.lock();
            batches
                .iter()
                .filter(|(_, b)| b.created_at.elapsed() >= self.config.batch_max_age)
                .map(|(k, _)| k.clone())
                .collect()
        };
        for key in keys {
            self.flush_key(&key).await;
        }
    }

    /// Flush every outstanding batch regardless of age, for graceful
    /// shutdown (§4.2, §5 cancellation).
    pub async fn flush_all(&self) {
        let keys: Vec<BatchKey> = self.batches.lock().keys().cloned().collect();
        for key in keys {
            self.flush_key(&key).await;
        }
    }

    async fn flush_key(&self, key: &BatchKey) {
        let batch = {
            let mut batches = self.batches.lock();
            batches.remove(key)
        };
        let Some(batch) = batch else { return };
        if batch.rows.is_empty() {
            return;
        }

        match self.send_with_retry(&batch).await {
            Ok(()) => {
                tracing::info!(
                    org_id = batch.org_id,
                    event_id = batch.event_id,
                    rows = batch.rows.len(),
                    "flushed batch"
                );
                metrics::counter!("roster_bridge_batches_flushed_total").increment(1);
                metrics::counter!("roster_bridge_rows_sent_total").increment(batch.rows.len() as u64);
            }
            Err(e) => {
                tracing::error!(
                    org_id = batch.org_id,
                    event_id = batch.event_id,
                    error = %e,
                    "dropping batch after exhausting retries"
                );
                metrics::counter!("roster_bridge_batches_dropped_total").increment(1);
            }
        }
    }

    async fn send_with_retry(&self, batch: &PendingBatch) -> Result<(), BridgeError> {
        let mut attempt = 0;
        loop {
            let result = self
                .transport
                .send(&batch.org_id, &batch.event_id, &batch.rows)
                .await;

            let outcome = match result {
                Ok(status) => BridgeError::from_status(status, String::new()),
                Err(e) => Some(e),
            };

            match outcome {
                None => return Ok(()), // 2xx, or 409 treated as idempotent success
                Some(err) if err.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.next_backoff(attempt);
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying batch send");
                    sleep(delay).await;
                    attempt += 1;
                }
                Some(err) => {
                    return Err(if err.is_retryable() {
                        BridgeError::RetriesExhausted {
                            attempts: attempt,
                            last: err.to_string(),
                        }
                    } else {
                        err
                    });
                }
            }
        }
    }
}
