//! Roster reconciliation core.
//!
//! An epoch-based convergence engine that ingests employee upsert and delta
//! events from partitioned sources, reconciles them against a document
//! store, and finalizes each run by marking employees absent from the
//! latest snapshot.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use roster_reconciler::{EpochManager, Reconciler, ReconcilerCache, CircuitBreaker, Config};
//! use roster_reconciler::{InMemoryStore, Store, UpsertMessage, Source};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
//!     let cfg = Config::for_tests().reconciler;
//!     let cache = Arc::new(ReconcilerCache::new(cfg.cache_ttl, cfg.max_cache_size_mb));
//!     let circuit = Arc::new(CircuitBreaker::new(cfg.error_threshold, cfg.circuit_reset));
//!
//!     let epoch_mgr = EpochManager::new(store.clone());
//!     let reconciler = Reconciler::new(store.clone(), cache, circuit, cfg);
//!
//!     let epoch = epoch_mgr.begin_run("acme", None).await?;
//!     reconciler
//!         .reconcile(
//!             "acme",
//!             vec![UpsertMessage { email: "alice@acme.com".into(), status_in_org: None, event_id: None }],
//!             epoch,
//!             Source::KafkaUpsert,
//!         )
//!         .await?;
//!     Ok(())
//! }
//! ```

mod bridge;
mod cache;
mod circuit;
mod config;
mod delta;
mod epoch;
mod error;
mod finalizer;
mod http;
mod model;
mod reconciler;
mod retry;
mod status;
mod store;

pub use bridge::{BatchTransport, Bridge, BridgeStats, HttpBatchTransport, IncomingMessage, UpsertRow};
pub use cache::ReconcilerCache;
pub use circuit::{CircuitBreaker, CircuitState};
pub use config::{BridgeConfig, Config, EventSourceConfig, ReconcilerConfig};
pub use delta::{DeltaMessage, DeltaOutcome, DeltaProcessor, DeltaType};
pub use epoch::EpochManager;
pub use error::{BridgeError, ConfigError, FinalizeError, ReconcileError, StoreError};
pub use finalizer::Finalizer;
pub use http::{router, AppState};
pub use model::{Employee, Organization, Source, Status};
pub use reconciler::{ReconcileOutcome, Reconciler, UpsertMessage};
pub use retry::{JitterMode, RetryConfig};
pub use status::{is_valid_email, normalize_email, normalize_status};
pub use store::{EmployeeWrite, InMemoryStore, Page, Store};
