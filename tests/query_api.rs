//! Query API integration tests
//!
//! Drives the axum router with `tower::ServiceExt::oneshot` against stores
//! populated through the ingestion consumer.

use a3s_audit::{
    query_router, AuditError, AuditEvent, AuditStore, ConsumerOptions, DetailsValidator,
    DlqHandler, EnvelopeDecoder, IngestionConsumer, IngestionService, MemoryAuditStore,
    MemoryDlqHandler, MemoryProvider, QueryState, QueueProvider, UpsertOutcome,
};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::NaiveDateTime;
use std::sync::Arc;
use tower::ServiceExt;

fn envelope(id: &str, ts: &str, event_type: &str, user: &str) -> String {
    serde_json::json!({
        "eventId": id,
        "timestamp": ts,
        "eventType": event_type,
        "userId": user,
        "performedBy": "admin",
        "details": "{\"k\":\"v\"}",
    })
    .to_string()
}

async fn seeded_state() -> QueryState {
    let store: Arc<dyn AuditStore> = Arc::new(MemoryAuditStore::new());
    let dlq: Arc<dyn DlqHandler> = Arc::new(MemoryDlqHandler::default());
    let consumer = IngestionConsumer::new(
        Arc::clone(&store),
        EnvelopeDecoder::new(),
        DetailsValidator::new(),
    )
    .with_dlq(Arc::clone(&dlq));

    for payload in [
        envelope("e1", "2026-01-10T08:00:00", "USER_CREATED", "u1"),
        envelope("e2", "2026-01-15T12:30:00", "LOGIN_SUCCESS", "u1"),
        envelope("e3", "2026-01-20T18:45:10.250", "USER_CREATED", "u2"),
        envelope("e4", "2026-02-01T00:00", "DATA_ACCESS", "u3"),
    ] {
        consumer.handle_message(payload.as_bytes()).await;
    }
    consumer
        .handle_message(br#"{"eventId":"bad","timestamp":"2026-01-10T08:00:00","eventType":"X","details":"{oops"}"#)
        .await;

    let provider: Arc<dyn QueueProvider> = Arc::new(MemoryProvider::default());
    QueryState {
        store,
        provider: Some(provider),
        stats: Some(consumer.stats()),
        dlq: Some(dlq),
        workers: None,
    }
}

async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let resp = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 1024 * 256)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn ids(json: &serde_json::Value) -> Vec<String> {
    json.as_array()
        .unwrap()
        .iter()
        .map(|e| e["eventId"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_list_all_ordered_by_timestamp() {
    let app = query_router(seeded_state().await);
    let (status, json) = get(app, "/api/audit").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&json), vec!["e1", "e2", "e3", "e4"]);
}

#[tokio::test]
async fn test_get_by_id() {
    let state = seeded_state().await;

    let (status, json) = get(query_router(state.clone()), "/api/audit/e3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["eventType"], "USER_CREATED");
    assert_eq!(json["timestamp"], "2026-01-20T18:45:10.250");
    assert_eq!(json["performedBy"], "admin");

    let (status, json) = get(query_router(state), "/api/audit/bad").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_by_user_and_type() {
    let state = seeded_state().await;

    let (_, json) = get(query_router(state.clone()), "/api/audit/user/u1").await;
    assert_eq!(ids(&json), vec!["e1", "e2"]);

    let (_, json) = get(query_router(state.clone()), "/api/audit/type/USER_CREATED").await;
    assert_eq!(ids(&json), vec!["e1", "e3"]);

    let (status, json) = get(query_router(state), "/api/audit/type/UNKNOWN").await;
    assert_eq!(status, StatusCode::OK);
    assert!(ids(&json).is_empty());
}

#[tokio::test]
async fn test_time_range_is_inclusive() {
    let state = seeded_state().await;

    let (status, json) = get(
        query_router(state.clone()),
        "/api/audit/time-range?start=2026-01-15T12:30:00&end=2026-02-01T00:00:00",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&json), vec!["e2", "e3", "e4"]);

    let (status, json) = get(
        query_router(state),
        "/api/audit/time-range?start=2026-01-15T12:30:00Z&end=2026-02-01T00:00:00",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"]["message"].as_str().unwrap().contains("start"));
}

#[tokio::test]
async fn test_dead_letters_endpoint() {
    let (status, json) = get(query_router(seeded_state().await), "/api/dead-letters?limit=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["deadLetters"][0]["eventId"], "bad");
    assert_eq!(json["deadLetters"][0]["eventType"], "X");
}

#[tokio::test]
async fn test_health_reports_consumer_stats() {
    let (status, json) = get(query_router(seeded_state().await), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["store"]["records"], 4);
    assert_eq!(json["queue"]["healthy"], true);
    assert_eq!(json["queue"]["info"]["provider"], "memory");
    assert_eq!(json["consumer"]["received"], 5);
    assert_eq!(json["consumer"]["persisted"], 4);
    assert_eq!(json["consumer"]["abandoned"], 1);
}

#[tokio::test]
async fn test_health_degraded_when_workers_stop() {
    let store: Arc<dyn AuditStore> = Arc::new(MemoryAuditStore::new());
    let queue = MemoryProvider::default();
    let provider: Arc<dyn QueueProvider> = Arc::new(queue.clone());
    let consumer = IngestionConsumer::new(
        Arc::clone(&store),
        EnvelopeDecoder::new(),
        DetailsValidator::new(),
    );
    let stats = consumer.stats();
    let ingestion = IngestionService::new(
        Arc::clone(&provider),
        consumer,
        "audit-ingest",
        ConsumerOptions::default(),
        2,
    )
    .start()
    .await
    .unwrap();
    let workers = ingestion.liveness();

    let state = QueryState {
        store,
        provider: Some(provider),
        stats: Some(stats),
        dlq: None,
        workers: Some(workers.clone()),
    };

    let (status, json) = get(query_router(state.clone()), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["workers"]["running"], 2);

    queue.close();
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while workers.is_alive() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let (status, json) = get(query_router(state), "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["workers"]["started"], 2);
    assert_eq!(json["workers"]["running"], 0);
    assert_eq!(json["workers"]["healthy"], false);

    ingestion.shutdown().await;
}

/// Store that is always unreachable
struct DownStore;

#[async_trait]
impl AuditStore for DownStore {
    async fn upsert_if_absent(&self, _: &AuditEvent) -> a3s_audit::Result<UpsertOutcome> {
        Err(down())
    }
    async fn find_by_id(&self, _: &str) -> a3s_audit::Result<Option<AuditEvent>> {
        Err(down())
    }
    async fn find_by_user_id(&self, _: &str) -> a3s_audit::Result<Vec<AuditEvent>> {
        Err(down())
    }
    async fn find_by_event_type(&self, _: &str) -> a3s_audit::Result<Vec<AuditEvent>> {
        Err(down())
    }
    async fn find_by_time_range(
        &self,
        _: NaiveDateTime,
        _: NaiveDateTime,
    ) -> a3s_audit::Result<Vec<AuditEvent>> {
        Err(down())
    }
    async fn find_all(&self) -> a3s_audit::Result<Vec<AuditEvent>> {
        Err(down())
    }
    async fn count(&self) -> a3s_audit::Result<u64> {
        Err(down())
    }
    fn name(&self) -> &str {
        "down"
    }
}

fn down() -> AuditError {
    AuditError::StorageUnavailable("connection refused".to_string())
}

#[tokio::test]
async fn test_storage_failure_is_503() {
    let state = QueryState::new(Arc::new(DownStore));

    let (status, json) = get(query_router(state.clone()), "/api/audit/user/u1").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"]["code"], "STORAGE_UNAVAILABLE");

    let (status, json) = get(query_router(state), "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["store"]["healthy"], false);
}
