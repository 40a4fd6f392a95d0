//! HTTP surface for runflow.
//!
//! Routes:
//!
//! - `POST /start` admits a run (202 new, 200 duplicate, 400 bad request)
//! - `GET /events/stream?run_id=` streams a run's events as SSE
//! - `GET /status/{run_id}` returns the run record
//! - `GET /projects/{project_id}` returns the persisted project document
//! - `GET /health` answers liveness probes

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_stream::stream;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use runflow::core::{RunEvent, RunRecord};
use runflow::errors::{ClientError, RunflowError};
use runflow::runtime::{RunService, StartRequest, StartResponse, StartStatus};
use runflow::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Name reported by `/health`.
pub const SERVICE_NAME: &str = "runflow-server";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    service: Arc<RunService>,
}

impl AppState {
    /// Wraps a service.
    #[must_use]
    pub fn new(service: Arc<RunService>) -> Self {
        Self { service }
    }
}

/// JSON error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

/// An error response.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status.
    pub status: StatusCode,
    /// Body.
    pub body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, err.code(), err.to_string())
    }
}

impl From<RunflowError> for ApiError {
    fn from(err: RunflowError) -> Self {
        match err {
            RunflowError::Client(e) => e.into(),
            RunflowError::NotFound(what) => Self::not_found(format!("{what} not found")),
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Builds the router.
pub fn build_router(service: Arc<RunService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/start", post(start))
        .route("/events/stream", get(stream_events))
        .route("/status/{run_id}", get(status))
        .route("/projects/{project_id}", get(project))
        .with_state(AppState::new(service))
}

/// Serves until the listener fails.
pub async fn run_server(service: Arc<RunService>, listen: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    info!(%listen, "runflow-server listening");
    axum::serve(listener, build_router(service))
        .await
        .context("server terminated with error")
}

/// Liveness payload.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "service": SERVICE_NAME,
        "time": iso_timestamp(),
    }))
}

/// Admits a run.
pub async fn start(
    State(state): State<AppState>,
    body: Result<Json<StartRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    let Json(request) =
        body.map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, "invalid_body", e.body_text()))?;
    let response = state.service.start(request)?;
    let code = match response.status {
        StartStatus::Accepted => StatusCode::ACCEPTED,
        StartStatus::AlreadyExists => StatusCode::OK,
    };
    Ok((code, Json(response)))
}

/// Query of the event stream route.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// The run to follow.
    #[serde(default)]
    pub run_id: Option<String>,
}

/// One SSE frame before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// SSE event name.
    pub event: String,
    /// JSON payload.
    pub data: String,
}

impl Frame {
    fn ping() -> Self {
        Self {
            event: "ping".to_string(),
            data: "{}".to_string(),
        }
    }

    fn from_event(event: &RunEvent) -> Self {
        Self {
            event: event.event_type.clone(),
            data: event.data.to_string(),
        }
    }
}

/// A ping frame followed by one frame per run event.
pub fn frames<S>(events: S) -> impl Stream<Item = Frame> + Send
where
    S: Stream<Item = RunEvent> + Send + 'static,
{
    stream! {
        yield Frame::ping();
        let mut events = Box::pin(events);
        while let Some(event) = events.next().await {
            let terminal = event.is_terminal();
            yield Frame::from_event(&event);
            if terminal {
                break;
            }
        }
    }
}

/// Streams a run's events.
pub async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let run_id = query
        .run_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::from(ClientError::MissingField("run_id".to_string())))?;
    let events = state.service.subscribe(run_id)?;
    debug!(run_id = %run_id, "event stream attached");

    let sse = frames(events).map(|frame| Ok(SseEvent::default().event(frame.event).data(frame.data)));
    Ok(Sse::new(sse).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}

/// Returns a run's record.
pub async fn status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunRecord>, ApiError> {
    state
        .service
        .status(&run_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("run '{run_id}' not found")))
}

/// Returns a persisted project document.
pub async fn project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.service.project_document(&project_id).await {
        Ok(Some(doc)) => Ok(Json(doc)),
        Ok(None) => Err(ApiError::not_found(format!("project '{project_id}' not found"))),
        Err(e) => {
            error!(project_id = %project_id, error = %e, "project lookup failed");
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "persistence", e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use runflow::config::RunflowConfig;
    use runflow::core::{RunStatus, Seed};
    use runflow::persistence::InMemoryProjectRepository;
    use runflow::testing::ScriptedProvider;

    fn state() -> AppState {
        let provider = ScriptedProvider::new()
            .respond(r#"[{"code": "7.G.3", "description": "Area", "evidence_note": "Model"}]"#)
            .respond(r#"{"grade_range": "7-8", "topic_cluster": "geometry"}"#);
        let service = RunService::new(
            RunflowConfig::default(),
            Arc::new(provider),
            Arc::new(InMemoryProjectRepository::new()),
        )
        .unwrap();
        AppState::new(Arc::new(service))
    }

    fn body() -> StartRequest {
        StartRequest::new("p1", "c1", Seed::new("fractions", "6-8"))
    }

    #[tokio::test]
    async fn test_health() {
        let Json(payload) = health().await;
        assert_eq!(payload["ok"], true);
        assert_eq!(payload["service"], SERVICE_NAME);
    }

    #[tokio::test]
    async fn test_start_then_duplicate() {
        let state = state();
        let (code, Json(first)) = start(State(state.clone()), Ok(Json(body()))).await.unwrap();
        assert_eq!(code, StatusCode::ACCEPTED);
        let (code, Json(second)) = start(State(state.clone()), Ok(Json(body()))).await.unwrap();
        assert_eq!(code, StatusCode::OK);
        assert_eq!(first.run_id, second.run_id);

        let record = state.service.wait_for(&first.run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Complete);
        let Json(snapshot) = status(State(state.clone()), Path(first.run_id)).await.unwrap();
        assert_eq!(snapshot.status, RunStatus::Complete);
        let Json(doc) = project(State(state), Path("p1".to_string())).await.unwrap();
        assert_eq!(doc["status"], "complete");
    }

    #[tokio::test]
    async fn test_missing_chat_id_is_bad_request() {
        let request = StartRequest {
            project_id: Some("p1".into()),
            ..StartRequest::default()
        };
        let err = start(State(state()), Ok(Json(request))).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.body.code, "missing_field");
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let state = state();
        let err = status(State(state.clone()), Path("nope".into())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err = project(State(state.clone()), Path("nope".into())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err = stream_events(
            State(state),
            Query(StreamQuery {
                run_id: Some("nope".into()),
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stream_requires_run_id() {
        let err = stream_events(State(state()), Query(StreamQuery::default()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.body.code, "missing_field");
    }

    #[tokio::test]
    async fn test_frames_start_with_ping_and_end_at_terminal() {
        let state = state();
        let (_, Json(started)) = start(State(state.clone()), Ok(Json(body()))).await.unwrap();
        let events = state.service.subscribe(&started.run_id).unwrap();

        let collected: Vec<Frame> =
            tokio::time::timeout(Duration::from_secs(5), frames(events).collect::<Vec<_>>())
                .await
                .unwrap();
        assert_eq!(collected[0], Frame::ping());
        assert_eq!(collected[1].event, "run_started");
        assert_eq!(collected.last().map(|f| f.event.as_str()), Some("run_completed"));
        let payload: serde_json::Value = serde_json::from_str(&collected[1].data).unwrap();
        assert_eq!(payload["run_id"], started.run_id.as_str());
    }

    #[test]
    fn test_router_builds() {
        let _router = build_router(state().service);
    }
}
