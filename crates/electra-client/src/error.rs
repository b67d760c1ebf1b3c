use std::io;

use electra_manifest::ManifestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
  #[error("request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("server answered {status} ({code}): {message}")]
  Api {
    status: u16,
    code: String,
    message: String,
  },

  #[error("upload of {locator} failed: {reason}")]
  Upload { locator: String, reason: String },

  #[error("download of {locator} failed: {reason}")]
  Download { locator: String, reason: String },

  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Io(#[from] io::Error),

  #[error("timed out waiting for dispatch {0}")]
  Timeout(String),

  #[error("wait for dispatch {0} was cancelled")]
  Cancelled(String),
}

impl ClientError {
  /// HTTP status of an error answer, if the server produced one.
  pub fn status(&self) -> Option<u16> {
    match self {
      ClientError::Api { status, .. } => Some(*status),
      ClientError::Http(err) => err.status().map(|status| status.as_u16()),
      _ => None,
    }
  }

  pub fn is_not_found(&self) -> bool {
    self.status() == Some(404)
  }
}

pub type ClientResult<T> = Result<T, ClientError>;
