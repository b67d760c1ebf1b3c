//! Error types and error response bodies.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use electra_asset::AssetError;
use electra_dispatcher::DispatchError;
use electra_manifest::ManifestError;
use electra_store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("{0}")]
  NotFound(String),

  #[error("{0}")]
  BadRequest(String),

  /// The request conflicts with the current state, such as a rejected
  /// status transition or an existing dispatch id.
  #[error("{0}")]
  Conflict(String),

  #[error("range not satisfiable for object of {size} bytes")]
  RangeNotSatisfiable { size: u64 },

  #[error("{0}")]
  Unavailable(String),

  #[error("{0}")]
  Internal(String),
}

/// Error payload: `{"error": {"code", "message"}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
  pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
  pub code: String,
  pub message: String,
}

impl ApiError {
  fn status_and_code(&self) -> (StatusCode, &'static str) {
    match self {
      ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
      ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
      ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
      ApiError::RangeNotSatisfiable { .. } => {
        (StatusCode::RANGE_NOT_SATISFIABLE, "RANGE_NOT_SATISFIABLE")
      }
      ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
      ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, code) = self.status_and_code();
    if status.is_server_error() {
      tracing::error!(code, error = %self, "request_failed");
    }

    let body = ErrorBody {
      error: ErrorDetail {
        code: code.to_string(),
        message: self.to_string(),
      },
    };
    let mut response = (status, Json(body)).into_response();
    if let ApiError::RangeNotSatisfiable { size } = self {
      if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
        response.headers_mut().insert(header::CONTENT_RANGE, value);
      }
    }
    response
  }
}

impl From<DispatchError> for ApiError {
  fn from(err: DispatchError) -> Self {
    let message = err.to_string();
    match err {
      DispatchError::NotFound(_)
      | DispatchError::NodeNotFound { .. }
      | DispatchError::AssetNotFound(_) => ApiError::NotFound(message),
      DispatchError::AlreadyExists(_) | DispatchError::Transition(_) => ApiError::Conflict(message),
      DispatchError::InvalidManifest(_)
      | DispatchError::InvalidRequest(_)
      | DispatchError::Archive(_) => ApiError::BadRequest(message),
      DispatchError::RangeNotSatisfiable { size } => ApiError::RangeNotSatisfiable { size },
      DispatchError::Asset(err) => match err {
        AssetError::NotFound { .. } => ApiError::NotFound(message),
        AssetError::InvalidRange { size, .. } => ApiError::RangeNotSatisfiable { size },
        AssetError::PathSafety { .. }
        | AssetError::DigestMismatch { .. }
        | AssetError::LengthMismatch { .. } => ApiError::BadRequest(message),
        AssetError::Io(_) => ApiError::Internal(message),
      },
      DispatchError::Manifest(ManifestError::UnsupportedSchema(_) | ManifestError::Graph(_)) => {
        ApiError::BadRequest(message)
      }
      DispatchError::Store(StoreError::NotFound(_)) => ApiError::NotFound(message),
      DispatchError::WorkerStopped(_) => ApiError::Unavailable(message),
      _ => ApiError::Internal(message),
    }
  }
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self {
    ApiError::BadRequest(rejection.body_text())
  }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Errors starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("dispatcher error: {0}")]
  Dispatch(#[from] DispatchError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
  use electra_graph::NodeId;

  use super::*;

  #[test]
  fn test_dispatch_errors_map_to_status_codes() {
    let cases = [
      (DispatchError::NotFound("d".into()), StatusCode::NOT_FOUND),
      (
        DispatchError::NodeNotFound {
          dispatch_id: "d".into(),
          node_id: NodeId(3),
        },
        StatusCode::NOT_FOUND,
      ),
      (DispatchError::AlreadyExists("d".into()), StatusCode::CONFLICT),
      (DispatchError::InvalidManifest("bad".into()), StatusCode::BAD_REQUEST),
      (
        DispatchError::RangeNotSatisfiable { size: 4 },
        StatusCode::RANGE_NOT_SATISFIABLE,
      ),
      (
        DispatchError::Asset(AssetError::DigestMismatch {
          expected: "a".into(),
          actual: "b".into(),
        }),
        StatusCode::BAD_REQUEST,
      ),
      (DispatchError::Timeout, StatusCode::INTERNAL_SERVER_ERROR),
    ];

    for (err, expected) in cases {
      assert_eq!(ApiError::from(err).into_response().status(), expected);
    }
  }

  #[test]
  fn test_unsatisfiable_range_reports_size() {
    let response = ApiError::RangeNotSatisfiable { size: 42 }.into_response();
    assert_eq!(
      response.headers().get(header::CONTENT_RANGE).unwrap(),
      "bytes */42"
    );
  }
}
