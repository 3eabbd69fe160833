// HTTP route handlers for the coderun API

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use coderun_common::types::{ExecutionRequest, JobInput};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bridge::{self, WaitVerdict};
use crate::error::ApiError;
use crate::metrics;
use crate::AppState;

pub const JOB_NAME: &str = "code execution";

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub output: String,
}

/// POST /execute - Run a snippet and answer with its captured output
pub async fn execute(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ExecutionRequest>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let result = run(&state, payload).await;
    if let Err(e) = &result {
        if matches!(e, ApiError::BadRequest(_) | ApiError::Submission(_)) {
            metrics::record_rejected(e.kind());
            warn!("Rejected execution request: {}", e);
        }
    }
    result
}

async fn run(
    state: &AppState,
    payload: Result<Json<ExecutionRequest>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let Json(request) = payload
        .map_err(|e| ApiError::BadRequest(format!("error binding request: {}", e.body_text())))?;

    let profile = request.validate()?;
    let language = profile.language.to_string();
    debug!(language = %language, code_bytes = request.code.len(), "Execution request validated");

    let input = JobInput {
        name: JOB_NAME.to_string(),
        tasks: vec![profile.task_spec(&request.code)],
    };

    // one deadline covers both the submission and the wait for an outcome
    let started = Instant::now();
    let deadline = started + state.request_timeout;

    let (outcome_tx, outcome_rx) = oneshot::channel();
    let submission = state
        .engine
        .submit_job(input, bridge::outcome_listener(outcome_tx));
    let job = match tokio::time::timeout_at(deadline, submission).await {
        Ok(submitted) => submitted?,
        Err(_) => {
            warn!(language = %language, "Timed out submitting job");
            return Err(ApiError::Timeout);
        }
    };

    metrics::record_submitted(&language);
    info!(job_id = %job.id, language = %language, "Job submitted");

    // The wait runs in its own task so it still resolves (as ClientClosed)
    // when the connection drops and this handler future is discarded.
    let (_closed_guard, closed_rx) = oneshot::channel::<()>();
    let remaining = deadline.saturating_duration_since(Instant::now());
    let job_id = job.id;
    let wait = tokio::spawn(async move {
        let verdict = bridge::await_outcome(outcome_rx, remaining, async move {
            let _ = closed_rx.await;
        })
        .await;

        let outcome = match &verdict {
            WaitVerdict::Completed(o) if o.succeeded => "completed",
            WaitVerdict::Completed(_) => "failed",
            WaitVerdict::TimedOut => "timeout",
            WaitVerdict::ClientClosed => "client_closed",
        };
        metrics::record_response(&language, outcome, started.elapsed().as_millis() as f64);
        match &verdict {
            WaitVerdict::Completed(_) => info!(job_id = %job_id, outcome, "Job finished"),
            WaitVerdict::TimedOut => warn!(job_id = %job_id, "Timed out waiting for job"),
            WaitVerdict::ClientClosed => {
                warn!(job_id = %job_id, "Client closed the connection before the job finished")
            }
        }
        verdict
    });

    let verdict = wait.await.unwrap_or(WaitVerdict::TimedOut);
    match verdict {
        WaitVerdict::Completed(outcome) => Ok(Json(ExecuteResponse {
            output: outcome.output,
        })),
        WaitVerdict::TimedOut => Err(ApiError::Timeout),
        WaitVerdict::ClientClosed => Err(ApiError::ClientClosed),
    }
}

/// OPTIONS /execute - CORS preflight; never touches the engine
pub async fn execute_preflight() -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Authorization"),
        ],
    )
}

/// Lets browsers read `/execute` responses from any origin
pub async fn allow_any_origin(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

/// GET /health - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// GET /metrics - Prometheus exposition
pub async fn metrics_handler() -> Response {
    match metrics::render_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
