//! Dispatch lifecycle endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use electra_dispatcher::{NodeOutcome, RegisterOptions};
use electra_graph::NodeId;
use electra_manifest::ResultManifest;
use electra_manifest::wire::{
  DispatchIdResponse, DispatchStatusView, JobReport, ResubmitRequest,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{ApiError, ApiResult, AppState};

/// Response to an executor report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReportResponse {
  /// False when the report repeated the node's current status.
  pub applied: bool,
}

pub fn routes() -> Router<AppState> {
  Router::new()
    .route("/dispatch/submit", post(submit))
    .route("/dispatch/register", post(register))
    .route("/dispatch/resubmit", post(resubmit))
    .route("/dispatch/:dispatch_id", delete(purge))
    .route("/dispatch/:dispatch_id/start", put(start))
    .route("/dispatch/:dispatch_id/cancel", put(cancel))
    .route("/dispatch/:dispatch_id/status", get(status))
    .route("/dispatch/:dispatch_id/manifest", get(manifest))
    .route(
      "/dispatch/:dispatch_id/electrons/:node_id/job",
      put(report_job),
    )
}

/// `POST /dispatch/submit`: register a manifest whose assets the server
/// can read from disk, and start it.
async fn submit(
  State(state): State<AppState>,
  payload: Result<Json<ResultManifest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DispatchIdResponse>)> {
  let Json(manifest) = payload?;
  let dispatch_id = state.dispatcher.submit(manifest).await?;
  Ok((StatusCode::ACCEPTED, Json(DispatchIdResponse { dispatch_id })))
}

/// `POST /dispatch/register`: answer with `remote_uri` set on every asset.
async fn register(
  State(state): State<AppState>,
  payload: Result<Json<ResultManifest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ResultManifest>)> {
  let Json(manifest) = payload?;
  let registered = state
    .dispatcher
    .register(manifest, RegisterOptions::default())
    .await?;
  Ok((StatusCode::CREATED, Json(registered.manifest)))
}

/// `POST /dispatch/resubmit`: register a redispatch of an existing dispatch.
/// The new dispatch is not started.
async fn resubmit(
  State(state): State<AppState>,
  payload: Result<Json<ResubmitRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DispatchIdResponse>)> {
  let Json(request) = payload?;
  let updates = request
    .decoded_updates()
    .map_err(|err| ApiError::BadRequest(format!("electron update is not base64: {err}")))?;
  let dispatch_id = state
    .dispatcher
    .redispatch(
      &request.dispatch_id,
      request.json_lattice,
      updates,
      request.reuse_previous_results,
    )
    .await?;
  info!(parent_id = %request.dispatch_id, dispatch_id = %dispatch_id, "resubmitted");
  Ok((StatusCode::CREATED, Json(DispatchIdResponse { dispatch_id })))
}

async fn start(
  State(state): State<AppState>,
  Path(dispatch_id): Path<String>,
) -> ApiResult<(StatusCode, Json<DispatchIdResponse>)> {
  state.dispatcher.start(&dispatch_id).await?;
  Ok((StatusCode::ACCEPTED, Json(DispatchIdResponse { dispatch_id })))
}

async fn cancel(
  State(state): State<AppState>,
  Path(dispatch_id): Path<String>,
) -> ApiResult<(StatusCode, Json<DispatchIdResponse>)> {
  state.dispatcher.cancel(&dispatch_id).await?;
  Ok((StatusCode::ACCEPTED, Json(DispatchIdResponse { dispatch_id })))
}

async fn purge(
  State(state): State<AppState>,
  Path(dispatch_id): Path<String>,
) -> ApiResult<StatusCode> {
  state.dispatcher.purge(&dispatch_id).await?;
  Ok(StatusCode::NO_CONTENT)
}

async fn status(
  State(state): State<AppState>,
  Path(dispatch_id): Path<String>,
) -> ApiResult<Json<DispatchStatusView>> {
  Ok(Json(state.dispatcher.status(&dispatch_id).await?))
}

async fn manifest(
  State(state): State<AppState>,
  Path(dispatch_id): Path<String>,
) -> ApiResult<Json<ResultManifest>> {
  Ok(Json(state.dispatcher.manifest(&dispatch_id).await?))
}

/// `PUT /dispatch/{id}/electrons/{node_id}/job`: executor status report.
async fn report_job(
  State(state): State<AppState>,
  Path((dispatch_id, node_id)): Path<(String, usize)>,
  payload: Result<Json<JobReport>, JsonRejection>,
) -> ApiResult<Json<JobReportResponse>> {
  let Json(report) = payload?;
  let outcome = NodeOutcome::try_from(report)?;
  let transition = state
    .dispatcher
    .mark_node_ready(&dispatch_id, NodeId(node_id), outcome)
    .await?;
  Ok(Json(JobReportResponse {
    applied: transition == electra_dispatcher::Transition::Applied,
  }))
}
