//! Thin axum handlers over the wire contract of §6.1. All business logic
//! lives in the core modules; handlers only translate requests/responses.

use crate::delta::{DeltaMessage, DeltaProcessor};
use crate::epoch::EpochManager;
use crate::error::ReconcileError;
use crate::finalizer::Finalizer;
use crate::model::Source;
use crate::reconciler::{Reconciler, UpsertMessage};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

pub struct AppState {
    pub epoch_manager: EpochManager,
    pub reconciler: Reconciler,
    pub delta_processor: DeltaProcessor,
    pub finalizer: Finalizer,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ingest/kafka/upserts", post(ingest_kafka_upserts))
        .route("/ingest/kafka/deltas", post(ingest_kafka_deltas))
        .route("/ingest/email", post(ingest_email))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "roster-reconciler",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now(),
    })
}

#[derive(Deserialize)]
struct UpsertRowBody {
    email: String,
    #[serde(rename = "statusInOrg")]
    status_in_org: Option<String>,
    #[serde(rename = "eventId")]
    event_id: Option<String>,
}

#[derive(Deserialize)]
struct KafkaUpsertsRequest {
    #[serde(rename = "orgId")]
    org_id: String,
    messages: Vec<UpsertRowBody>,
    #[serde(rename = "closeAfter")]
    close_after: Option<bool>,
}

#[derive(Serialize)]
struct KafkaUpsertsResponse {
    success: bool,
    processed: usize,
    skipped: usize,
    errors: usize,
    epoch: u64,
    finalized: bool,
    #[serde(rename = "durationMs")]
    duration_ms: u64,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

#[tracing::instrument(skip(state, req), fields(org_id = %req.org_id))]
async fn ingest_kafka_upserts(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KafkaUpsertsRequest>,
) -> Response {
    if req.org_id.trim().is_empty() {
        return bad_request("orgId is required");
    }

    let start = Instant::now();
    let epoch = match state.epoch_manager.begin_run(&req.org_id, None).await {
        Ok(e) => e,
        Err(err) => return internal_error(err),
    };

    let messages = req
        .messages
        .into_iter()
        .map(|m| UpsertMessage {
            email: m.email,
            status_in_org: m.status_in_org,
            event_id: m.event_id,
        })
        .collect();

    let outcome = match state
        .reconciler
        .reconcile(&req.org_id, messages, epoch, Source::KafkaUpsert)
        .await
    {
        Ok(o) => o,
        Err(ReconcileError::CircuitOpen) => return service_unavailable(),
        Err(err @ ReconcileError::Store(_)) => return internal_error(err),
    };

    let mut finalized = false;
    if req.close_after.unwrap_or(false) {
        if let Err(err) = state.finalizer.finalize_run(&req.org_id, epoch).await {
            return internal_error(err);
        }
        finalized = true;
    }

    Json(KafkaUpsertsResponse {
        success: true,
        processed: outcome.processed,
        skipped: outcome.skipped,
        errors: outcome.errors,
        epoch,
        finalized,
        duration_ms: start.elapsed().as_millis() as u64,
    })
    .into_response()
}

#[derive(Deserialize)]
struct DeltaRowBody {
    email: String,
    #[serde(rename = "deltaType")]
    delta_type: String,
    #[serde(rename = "eventId")]
    event_id: Option<String>,
}

#[derive(Deserialize)]
struct KafkaDeltasRequest {
    #[serde(rename = "orgId")]
    org_id: String,
    messages: Vec<DeltaRowBody>,
}

#[derive(Serialize)]
struct KafkaDeltasResponse {
    success: bool,
    processed: usize,
    skipped: usize,
}

#[tracing::instrument(skip(state, req), fields(org_id = %req.org_id))]
async fn ingest_kafka_deltas(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KafkaDeltasRequest>,
) -> Response {
    if req.org_id.trim().is_empty() {
        return bad_request("orgId is required");
    }

    let deltas = req
        .messages
        .into_iter()
        .map(|m| DeltaMessage {
            email: m.email,
            delta_type: m.delta_type,
            event_id: m.event_id,
        })
        .collect();

    match state
        .delta_processor
        .apply_many(&req.org_id, deltas, Source::KafkaDelta)
        .await
    {
        Ok(outcome) => Json(KafkaDeltasResponse {
            success: true,
            processed: outcome.processed,
            skipped: outcome.skipped,
        })
        .into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Deserialize)]
struct EmailIngestRequest {
    #[serde(rename = "orgId")]
    org_id: String,
    #[serde(rename = "orgName")]
    org_name: Option<String>,
    kind: Option<String>,
    rows: Vec<serde_json::Value>,
}

#[derive(Serialize)]
struct EmailIngestResponse {
    success: bool,
    processed: usize,
    kind: String,
}

/// JSON-rows variant of the email ingestion endpoint. The multipart/file
/// variant is a documented non-goal — file decoding is out of scope — so a
/// `multipart/form-data` request is rejected with 501 before any body
/// parsing is attempted (§4.6).
#[tracing::instrument(skip(state, headers, body))]
async fn ingest_email(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    if is_multipart(&headers) {
        return multipart_not_implemented().await;
    }

    let req: EmailIngestRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(err) => return bad_request(&format!("invalid request body: {err}")),
    };

    if req.org_id.trim().is_empty() {
        return bad_request("orgId is required");
    }

    let kind = req.kind.unwrap_or_else(|| "upserts".to_string());
    match kind.as_str() {
        "upserts" => {
            let epoch = match state.epoch_manager.begin_run(&req.org_id, req.org_name).await {
                Ok(e) => e,
                Err(err) => return internal_error(err),
            };

            let messages: Vec<UpsertMessage> = req
                .rows
                .into_iter()
                .filter_map(|v| serde_json::from_value::<UpsertRowBody>(v).ok())
                .map(|m| UpsertMessage {
                    email: m.email,
                    status_in_org: m.status_in_org,
                    event_id: m.event_id,
                })
                .collect();

            let outcome = match state
                .reconciler
                .reconcile(&req.org_id, messages, epoch, Source::EmailUpsert)
                .await
            {
                Ok(o) => o,
                Err(ReconcileError::CircuitOpen) => return service_unavailable(),
                Err(err @ ReconcileError::Store(_)) => return internal_error(err),
            };

            // `email:upsert` always finalizes the run it opened (§6.1).
            if let Err(err) = state.finalizer.finalize_run(&req.org_id, epoch).await {
                return internal_error(err);
            }

            Json(EmailIngestResponse {
                success: true,
                processed: outcome.processed,
                kind: "upserts".to_string(),
            })
            .into_response()
        }
        "deltas" => {
            let deltas: Vec<DeltaMessage> = req
                .rows
                .into_iter()
                .filter_map(|v| serde_json::from_value::<DeltaRowBody>(v).ok())
                .map(|m| DeltaMessage {
                    email: m.email,
                    delta_type: m.delta_type,
                    event_id: m.event_id,
                })
                .collect();

            match state
                .delta_processor
                .apply_many(&req.org_id, deltas, Source::EmailDelta)
                .await
            {
                Ok(outcome) => Json(EmailIngestResponse {
                    success: true,
                    processed: outcome.processed,
                    kind: "deltas".to_string(),
                })
                .into_response(),
                Err(err) => internal_error(err),
            }
        }
        other => bad_request(&format!("unknown kind: {other}")),
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody { error: "bad_request", message: message.to_string() }),
    )
        .into_response()
}

fn service_unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorBody {
            error: "circuit_open",
            message: "reconciler circuit breaker is open".to_string(),
        }),
    )
        .into_response()
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    tracing::error!(error = %err, "unhandled failure in HTTP handler");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody { error: "internal_error", message: err.to_string() }),
    )
        .into_response()
}

fn is_multipart(headers: &axum::http::HeaderMap) -> bool {
    headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/"))
}

/// The multipart/file variant of `/ingest/email` is out of scope: file
/// decoding belongs to an external collaborator, not this core (§1, §4.6).
async fn multipart_not_implemented() -> Response {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(ErrorBody {
            error: "not_implemented",
            message: "multipart file ingestion is out of scope".to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ReconcilerCache;
    use crate::circuit::CircuitBreaker;
    use crate::config::Config;
    use crate::store::InMemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn build_state() -> Arc<AppState> {
        let store: Arc<dyn crate::store::Store> = Arc::new(InMemoryStore::new());
        let cfg = Config::for_tests().reconciler;
        let cache = Arc::new(ReconcilerCache::new(cfg.cache_ttl, cfg.max_cache_size_mb));
        let circuit = Arc::new(CircuitBreaker::new(cfg.error_threshold, cfg.circuit_reset));
        Arc::new(AppState {
            epoch_manager: EpochManager::new(store.clone()),
            reconciler: Reconciler::new(store.clone(), cache, circuit, cfg),
            delta_processor: DeltaProcessor::new(store.clone()),
            finalizer: Finalizer::new(store.clone()),
        })
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = router(build_state());
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn kafka_upserts_round_trip() {
        let app = router(build_state());
        let body = serde_json::json!({
            "orgId": "acme",
            "messages": [{"email": "alice@x.com", "statusInOrg": "active"}],
            "closeAfter": true,
        });
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest/kafka/upserts")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["processed"], 1);
        assert_eq!(parsed["finalized"], true);
    }

    #[tokio::test]
    async fn missing_org_id_is_bad_request() {
        let app = router(build_state());
        let body = serde_json::json!({"orgId": "", "messages": []});
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest/kafka/upserts")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn kafka_deltas_round_trip() {
        let app = router(build_state());
        let body = serde_json::json!({
            "orgId": "acme",
            "messages": [{"email": "alice@x.com", "deltaType": "left"}],
        });
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest/kafka/deltas")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        // alice doesn't exist yet, so the delta is skipped not processed.
        assert_eq!(parsed["skipped"], 1);
    }

    #[tokio::test]
    async fn email_ingest_upserts_always_finalizes() {
        let app = router(build_state());
        let body = serde_json::json!({
            "orgId": "acme",
            "rows": [{"email": "bob@x.com", "statusInOrg": "active"}],
        });
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest/email")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["kind"], "upserts");
        assert_eq!(parsed["processed"], 1);
    }

    #[tokio::test]
    async fn email_ingest_unknown_kind_is_bad_request() {
        let app = router(build_state());
        let body = serde_json::json!({"orgId": "acme", "kind": "bogus", "rows": []});
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest/email")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn email_ingest_multipart_is_not_implemented() {
        let app = router(build_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest/email")
                    .header("content-type", "multipart/form-data; boundary=X")
                    .body(Body::from("--X--"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
