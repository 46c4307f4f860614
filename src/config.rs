//! Environment-driven configuration (§6.4).
//!
//! Loaded once at process startup and validated eagerly; every tunable has
//! a typed default so unit tests can build a [`Config`] without touching
//! the environment.

use crate::error::ConfigError;
use std::env;
use std::time::Duration;

/// Event source configuration, carried as opaque settings for an external
/// bridge runner. The core itself is fed via the batching APIs, not a live
/// broker connection (§6.4).
#[derive(Clone, Debug)]
pub struct EventSourceConfig {
    pub kafka_brokers: Option<String>,
    pub kafka_client_id: Option<String>,
    pub kafka_group_id: Option<String>,
    pub topic_upserts: Option<String>,
    pub topic_deltas: Option<String>,
}

/// Batching bridge tunables (§4.2).
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub normalizer_base_url: String,
    pub ingestion_token: String,
    pub http_timeout: Duration,
    pub batch_max_rows: usize,
    pub batch_max_age: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub max_retries: u32,
    pub concurrency: usize,
}

/// Reconciler tunables (§4.3, §6.4).
#[derive(Clone, Copy, Debug)]
pub struct ReconcilerConfig {
    pub firestore_batch_size: usize,
    pub query_chunk_size: usize,
    pub max_parallel_batches: usize,
    pub cache_ttl: Duration,
    pub max_cache_size_mb: usize,
    pub error_threshold: f64,
    pub circuit_reset: Duration,
    pub adaptive_batch_threshold: f64,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub event_source: EventSourceConfig,
    pub bridge: BridgeConfig,
    pub reconciler: ReconcilerConfig,
    pub port: u16,
}

impl Config {
    /// Load from the environment, validating required variables eagerly.
    /// Per the "Fatal" error taxonomy entry (§7), a missing required
    /// variable should lead the caller to exit non-zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        let normalizer_base_url =
            require_var("NORMALIZER_BASE_URL")?;
        let ingestion_token = require_var("INGESTION_TOKEN")?;

        Ok(Self {
            event_source: EventSourceConfig {
                kafka_brokers: env::var("KAFKA_BROKERS").ok(),
                kafka_client_id: env::var("KAFKA_CLIENT_ID").ok(),
                kafka_group_id: env::var("KAFKA_GROUP_ID").ok(),
                topic_upserts: env::var("TOPIC_UPSERTS").ok(),
                topic_deltas: env::var("TOPIC_DELTAS").ok(),
            },
            bridge: BridgeConfig {
                normalizer_base_url,
                ingestion_token,
                http_timeout: parse_millis("HTTP_TIMEOUT_MS", 10_000)?,
                batch_max_rows: parse_usize("BATCH_MAX_ROWS", 1000)?,
                batch_max_age: parse_millis("BATCH_MAX_MS", 1200)?,
                retry_base: parse_millis("RETRY_BASE_MS", 500)?,
                retry_max: parse_millis("RETRY_MAX_MS", 15_000)?,
                max_retries: parse_u32("MAX_RETRIES", 8)?,
                concurrency: parse_usize("CONCURRENCY", 1)?,
            },
            reconciler: ReconcilerConfig {
                firestore_batch_size: parse_usize("FIRESTORE_BATCH_SIZE", 500)?,
                query_chunk_size: parse_usize("QUERY_CHUNK_SIZE", 10)?,
                max_parallel_batches: parse_usize("MAX_PARALLEL_BATCHES", 5)?,
                cache_ttl: parse_millis("CACHE_TTL_MS", 300_000)?,
                max_cache_size_mb: parse_usize("MAX_CACHE_SIZE_MB", 100)?,
                error_threshold: parse_f64("ERROR_THRESHOLD", 0.3)?,
                circuit_reset: parse_millis("CIRCUIT_RESET_MS", 60_000)?,
                adaptive_batch_threshold: parse_f64("ADAPTIVE_BATCH_THRESHOLD", 0.8)?,
            },
            port: parse_u32("PORT", 8080)? as u16,
        })
    }

    /// Build a config with spec defaults and no real HTTP target, for
    /// tests that never exercise the bridge's wire transport.
    pub fn for_tests() -> Self {
        Self {
            event_source: EventSourceConfig {
                kafka_brokers: None,
                kafka_client_id: None,
                kafka_group_id: None,
                topic_upserts: None,
                topic_deltas: None,
            },
            bridge: BridgeConfig {
                normalizer_base_url: "http://localhost:8080".to_string(),
                ingestion_token: "test-token".to_string(),
                http_timeout: Duration::from_millis(10_000),
                batch_max_rows: 1000,
                batch_max_age: Duration::from_millis(1200),
                retry_base: Duration::from_millis(500),
                retry_max: Duration::from_millis(15_000),
                max_retries: 8,
                concurrency: 1,
            },
            reconciler: ReconcilerConfig {
                firestore_batch_size: 500,
                query_chunk_size: 10,
                max_parallel_batches: 5,
                cache_ttl: Duration::from_millis(300_000),
                max_cache_size_mb: 100,
                error_threshold: 0.3,
                circuit_reset: Duration::from_millis(60_000),
                adaptive_batch_threshold: 0.8,
            },
            port: 8080,
        }
    }
}

fn require_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidVar { name, value: v }),
    }
}

fn parse_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidVar { name, value: v }),
    }
}

fn parse_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidVar { name, value: v }),
    }
}

fn parse_millis(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(Duration::from_millis(default_ms)),
        Ok(v) => v
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidVar { name, value: v }),
    }
}
