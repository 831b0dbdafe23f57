use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::bootstrap::Runtime;
use crate::model::{is_valid_code, Instrument};
use crate::notify::{ChannelHandle, Dispatcher, Payload, ReportEntry};
use crate::pipeline::Pipeline;
use crate::tasks::{TaskRecord, TaskTracker, TaskUpdate};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub tracker: Arc<TaskTracker>,
    pub dispatcher: Dispatcher,
    pub channels: Arc<Vec<ChannelHandle>>,
    /// Configured instruments; used to fill in names for known codes.
    pub known: Arc<Vec<Instrument>>,
}

impl AppState {
    pub fn from_runtime(rt: &Runtime) -> Self {
        Self {
            pipeline: rt.pipeline.clone(),
            tracker: Arc::clone(&rt.tracker),
            dispatcher: rt.dispatcher,
            channels: Arc::clone(&rt.channels),
            known: Arc::new(rt.config.instruments.clone()),
        }
    }

    fn instrument(&self, code: &str, name: Option<&str>) -> Instrument {
        let base = self
            .known
            .iter()
            .find(|i| i.code.eq_ignore_ascii_case(code))
            .cloned()
            .unwrap_or_else(|| Instrument::new(code));
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => base.named(n),
            None => base,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/analyze", get(analyze_query).post(analyze_json))
        .route("/tasks", get(list_tasks))
        .route("/tasks/{id}", get(get_task))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeReq {
    code: String,
    #[serde(default)]
    name: Option<String>,
    /// Deliver the result to the configured channels when done.
    #[serde(default)]
    notify: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Accepted {
    pub task_id: String,
}

fn error_body(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(json!({ "error": msg.into() }))).into_response()
}

async fn analyze_json(State(state): State<AppState>, Json(req): Json<AnalyzeReq>) -> Response {
    submit(state, req)
}

async fn analyze_query(State(state): State<AppState>, Query(req): Query<AnalyzeReq>) -> Response {
    submit(state, req)
}

fn submit(state: AppState, req: AnalyzeReq) -> Response {
    let code = req.code.trim();
    if !is_valid_code(code) {
        return error_body(StatusCode::BAD_REQUEST, format!("invalid instrument code {code:?}"));
    }
    let instrument = state.instrument(code, req.name.as_deref());
    let task_id = match state.tracker.create(&instrument) {
        Ok(id) => id,
        Err(e) => return error_body(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    };
    tracing::info!(target: "api", task_id = %task_id, code = %instrument.code, notify = req.notify, "analysis accepted");

    tokio::spawn(run_task(state, task_id.clone(), instrument, req.notify));

    (StatusCode::ACCEPTED, Json(Accepted { task_id })).into_response()
}

/// Drive one task to a terminal state. Runs detached; nobody cancels it.
async fn run_task(state: AppState, id: String, instrument: Instrument, notify: bool) {
    if let Err(e) = state.tracker.update(&id, TaskUpdate::Start) {
        tracing::error!(target: "api", task_id = %id, error = %e, "task could not start");
        return;
    }

    let tracker = Arc::clone(&state.tracker);
    let stage_id = id.clone();
    let result = state
        .pipeline
        .run(&instrument, move |stage| tracker.set_stage(&stage_id, stage))
        .await;

    let update = match &result {
        Ok(decision) => TaskUpdate::Succeed(decision.clone()),
        Err(e) => TaskUpdate::Fail(e.to_string()),
    };
    if let Err(e) = state.tracker.update(&id, update) {
        tracing::error!(target: "api", task_id = %id, error = %e, "task result not recorded");
    }

    if notify && !state.channels.is_empty() {
        let payload = match result {
            Ok(decision) => Payload::Single(decision),
            Err(e) => Payload::dashboard(vec![ReportEntry::from_result(&instrument, &Err(e))]),
        };
        let report = state.dispatcher.dispatch(&payload, &state.channels).await;
        tracing::info!(
            target: "api",
            task_id = %id,
            delivered = ?report.delivered(),
            failed = ?report.failed(),
            "task notification sent"
        );
    }
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskRecord>, Response> {
    state
        .tracker
        .get(&id)
        .map(Json)
        .map_err(|e| error_body(StatusCode::NOT_FOUND, e.to_string()))
}

async fn list_tasks(State(state): State<AppState>) -> Json<Vec<TaskRecord>> {
    Json(state.tracker.list())
}
