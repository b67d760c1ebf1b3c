//! Pull endpoint for out-of-process executors.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::AppState;

/// Longest a request may wait for a job.
const MAX_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
pub struct NextJobQuery {
  #[serde(default)]
  pub wait_ms: u64,
}

pub fn routes() -> Router<AppState> {
  Router::new().route("/executor/jobs/next", get(next_job))
}

/// `GET /executor/jobs/next?wait_ms=N`: the next queued job, or 204 when
/// none arrives in time.
async fn next_job(State(state): State<AppState>, Query(query): Query<NextJobQuery>) -> Response {
  let wait = Duration::from_millis(query.wait_ms).min(MAX_WAIT);
  match state.jobs.next(wait).await {
    Some(job) => Json(job).into_response(),
    None => StatusCode::NO_CONTENT.into_response(),
  }
}
