use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use shuttle_axum::axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::job::{RunJob, Trigger};
use crate::metrics::Metrics;
use crate::scheduler::Scheduler;
use crate::sources::format_hhmm;

#[derive(Clone)]
pub struct AppState {
    pub job: Arc<RunJob>,
    pub scheduler: Arc<Scheduler>,
}

pub fn create_router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/run", post(run))
        .route("/api/status", get(status))
        .route("/api/schedule/reload", post(reload_schedule))
        .layer(CorsLayer::very_permissive())
        .with_state(state);

    match metrics {
        Some(m) => router.merge(m.router()),
        None => router,
    }
}

async fn run(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    info!("manual run requested over HTTP");
    match state.job.clone().spawn_trigger(Trigger::Manual).await {
        Some(_) => (StatusCode::ACCEPTED, Json(json!({ "status": "started" }))),
        None => (
            StatusCode::CONFLICT,
            Json(json!({ "status": "already_running" })),
        ),
    }
}

#[derive(Serialize)]
struct StatusResp {
    running: bool,
    last_run: Option<String>,
    schedule: Vec<String>,
}

async fn status(State(state): State<AppState>) -> Json<StatusResp> {
    let last_run = match state.job.orchestrator().checkpoint().last_run_time().await {
        Ok(ts) => ts.map(|t| t.to_rfc3339()),
        Err(e) => {
            warn!(error = %e, "could not read last run time");
            None
        }
    };
    Json(StatusResp {
        running: state.job.lock().is_running(),
        last_run,
        schedule: state.scheduler.times().iter().map(format_hhmm).collect(),
    })
}

async fn reload_schedule(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let times = state
        .job
        .orchestrator()
        .sources()
        .load_schedule()
        .map_err(|e| {
            warn!(error = %e, "schedule reload failed");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": e.to_string() })),
            )
        })?;
    let (removed, added) = state.scheduler.reload(times);
    Ok(Json(json!({ "removed": removed, "added": added })))
}
