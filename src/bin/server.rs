//! HTTP entry point: wires the core modules to the ingestion endpoints of
//! §6.1 and serves them with graceful shutdown (§5 cancellation).

use roster_reconciler::{
    router, AppState, CircuitBreaker, Config, DeltaProcessor, EpochManager, Finalizer,
    InMemoryStore, Reconciler, ReconcilerCache, Store,
};
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::from_env().unwrap_or_else(|err| {
        tracing::error!(error = %err, "fatal configuration error");
        std::process::exit(1);
    });

    // The document database transport itself is out of scope; the in-memory
    // fake stands in wherever this binary is run without one wired in.
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());

    let cache = Arc::new(ReconcilerCache::new(
        config.reconciler.cache_ttl,
        config.reconciler.max_cache_size_mb,
    ));
    let circuit = Arc::new(CircuitBreaker::new(
        config.reconciler.error_threshold,
        config.reconciler.circuit_reset,
    ));

    let state = Arc::new(AppState {
        epoch_manager: EpochManager::new(store.clone()),
        reconciler: Reconciler::new(store.clone(), cache, circuit, config.reconciler),
        delta_processor: DeltaProcessor::with_concurrency(store.clone(), config.bridge.concurrency),
        finalizer: Finalizer::new(store.clone()),
    });

    let app = router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, closing health endpoint and draining in-flight work");
}
