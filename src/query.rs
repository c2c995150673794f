//! Read-only HTTP API over stored audit records
//!
//! - GET /api/audit                            all records
//! - GET /api/audit/:event_id                  single record (404 if absent)
//! - GET /api/audit/user/:user_id              records about a user
//! - GET /api/audit/type/:event_type           records of one type
//! - GET /api/audit/time-range?start=&end=     records in an inclusive window
//! - GET /api/dead-letters?limit=              recently abandoned messages
//! - GET /health                               store/queue/worker liveness and consumer stats

use crate::consumer::ConsumerStats;
use crate::dlq::DlqHandler;
use crate::error::AuditError;
use crate::provider::QueueProvider;
use crate::service::WorkerLiveness;
use crate::store::AuditStore;
use crate::types::{local_datetime, AuditEvent};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

/// Shared state for query handlers
#[derive(Clone)]
pub struct QueryState {
    pub store: Arc<dyn AuditStore>,
    pub provider: Option<Arc<dyn QueueProvider>>,
    pub stats: Option<Arc<ConsumerStats>>,
    pub dlq: Option<Arc<dyn DlqHandler>>,
    pub workers: Option<WorkerLiveness>,
}

impl QueryState {
    /// State backed by a store only
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            provider: None,
            stats: None,
            dlq: None,
            workers: None,
        }
    }
}

/// Create the query router
pub fn query_router(state: QueryState) -> Router {
    Router::new()
        .route("/api/audit", get(list_all))
        .route("/api/audit/time-range", get(by_time_range))
        .route("/api/audit/user/:user_id", get(by_user))
        .route("/api/audit/type/:event_type", get(by_type))
        .route("/api/audit/:event_id", get(get_event))
        .route("/api/dead-letters", get(dead_letters))
        .route("/health", get(health))
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

/// Error response: `{"error":{"code":…,"message":…}}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST",
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            message: message.into(),
        }
    }
}

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        let (status, code) = match &err {
            AuditError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            e if e.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        };
        if status.is_server_error() {
            tracing::warn!(error = %err, "Query failed");
        }
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": { "code": self.code, "message": self.message }
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

// =============================================================================
// Handlers
// =============================================================================

/// GET /api/audit
async fn list_all(State(state): State<QueryState>) -> ApiResult<Vec<AuditEvent>> {
    Ok(Json(state.store.find_all().await?))
}

/// GET /api/audit/:event_id
async fn get_event(
    State(state): State<QueryState>,
    Path(event_id): Path<String>,
) -> ApiResult<AuditEvent> {
    match state.store.find_by_id(&event_id).await? {
        Some(event) => Ok(Json(event)),
        None => Err(ApiError::not_found(format!(
            "Audit event {} not found",
            event_id
        ))),
    }
}

/// GET /api/audit/user/:user_id
async fn by_user(
    State(state): State<QueryState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<AuditEvent>> {
    Ok(Json(state.store.find_by_user_id(&user_id).await?))
}

/// GET /api/audit/type/:event_type
async fn by_type(
    State(state): State<QueryState>,
    Path(event_type): Path<String>,
) -> ApiResult<Vec<AuditEvent>> {
    Ok(Json(state.store.find_by_event_type(&event_type).await?))
}

#[derive(Debug, Deserialize)]
struct TimeRangeQuery {
    start: Option<String>,
    end: Option<String>,
}

fn parse_bound(name: &str, value: Option<&str>) -> std::result::Result<chrono::NaiveDateTime, ApiError> {
    let value = value.ok_or_else(|| ApiError::bad_request(format!("Missing '{}' parameter", name)))?;
    local_datetime::parse(value).map_err(|e| {
        ApiError::bad_request(format!(
            "Invalid '{}' date-time '{}': {} (expected YYYY-MM-DDTHH:MM:SS)",
            name, value, e
        ))
    })
}

/// GET /api/audit/time-range?start=…&end=…
async fn by_time_range(
    State(state): State<QueryState>,
    Query(params): Query<TimeRangeQuery>,
) -> ApiResult<Vec<AuditEvent>> {
    let start = parse_bound("start", params.start.as_deref())?;
    let end = parse_bound("end", params.end.as_deref())?;
    if start > end {
        return Err(ApiError::bad_request("'start' must not be after 'end'"));
    }
    Ok(Json(state.store.find_by_time_range(start, end).await?))
}

#[derive(Debug, Deserialize)]
struct DeadLetterQuery {
    limit: Option<usize>,
}

/// GET /api/dead-letters
async fn dead_letters(
    State(state): State<QueryState>,
    Query(params): Query<DeadLetterQuery>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let limit = params.limit.unwrap_or(50).min(500);

    match &state.dlq {
        Some(dlq) => {
            let letters = dlq.list(limit).await?;
            Ok(Json(serde_json::json!({
                "deadLetters": letters,
                "total": dlq.count().await?,
            })))
        }
        None => Ok(Json(serde_json::json!({
            "deadLetters": [],
            "total": 0,
        }))),
    }
}

/// GET /health
async fn health(State(state): State<QueryState>) -> impl IntoResponse {
    let (store_ok, records) = match state.store.count().await {
        Ok(n) => (true, Some(n)),
        Err(e) => {
            tracing::warn!(error = %e, store = state.store.name(), "Store health check failed");
            (false, None)
        }
    };

    let queue = match &state.provider {
        Some(provider) => match provider.info().await {
            Ok(info) => serde_json::json!({ "healthy": true, "info": info }),
            Err(e) => {
                tracing::warn!(error = %e, provider = provider.name(), "Queue health check failed");
                serde_json::json!({
                    "healthy": false,
                    "provider": provider.name(),
                    "queue": provider.queue_name(),
                    "error": e.to_string(),
                })
            }
        },
        None => serde_json::Value::Null,
    };
    let queue_ok = queue.is_null() || queue["healthy"] == true;

    let workers = state.workers.as_ref().map(|w| {
        serde_json::json!({
            "started": w.started(),
            "running": w.running(),
            "healthy": w.is_alive(),
        })
    });
    let workers_ok = state.workers.as_ref().map_or(true, WorkerLiveness::is_alive);

    let status = if store_ok && queue_ok && workers_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = serde_json::json!({
        "status": if status == StatusCode::OK { "ok" } else { "degraded" },
        "store": {
            "backend": state.store.name(),
            "healthy": store_ok,
            "records": records,
        },
        "queue": queue,
        "workers": workers,
        "consumer": state.stats.as_ref().map(|s| s.snapshot()),
    });

    (status, Json(body))
}
