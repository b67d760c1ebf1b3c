use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status of a dispatch or of one of its nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
  #[default]
  New,
  PendingReuse,
  PendingReplacement,
  Dispatching,
  DispatchingSublattice,
  Running,
  Postprocessing,
  Completed,
  Failed,
  PostprocessingFailed,
  Timeout,
  ConnectionLost,
  Cancelled,
}

/// Coarse grouping of statuses. Fully determined by the status value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
  Pending,
  Dispatching,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl Status {
  pub const ALL: [Status; 13] = [
    Status::New,
    Status::PendingReuse,
    Status::PendingReplacement,
    Status::Dispatching,
    Status::DispatchingSublattice,
    Status::Running,
    Status::Postprocessing,
    Status::Completed,
    Status::Failed,
    Status::PostprocessingFailed,
    Status::Timeout,
    Status::ConnectionLost,
    Status::Cancelled,
  ];

  pub fn category(self) -> StatusCategory {
    match self {
      Status::New | Status::PendingReuse | Status::PendingReplacement => StatusCategory::Pending,
      Status::Dispatching | Status::DispatchingSublattice => StatusCategory::Dispatching,
      Status::Running | Status::Postprocessing => StatusCategory::Running,
      Status::Completed => StatusCategory::Completed,
      Status::Failed
      | Status::PostprocessingFailed
      | Status::Timeout
      | Status::ConnectionLost => StatusCategory::Failed,
      Status::Cancelled => StatusCategory::Cancelled,
    }
  }

  /// Completed, failed, or cancelled.
  pub fn is_terminal(self) -> bool {
    matches!(
      self.category(),
      StatusCategory::Completed | StatusCategory::Failed | StatusCategory::Cancelled
    )
  }

  /// Handed to an executor or a child dispatch and not yet terminal.
  pub fn is_in_flight(self) -> bool {
    matches!(
      self.category(),
      StatusCategory::Dispatching | StatusCategory::Running
    )
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Status::New => "NEW",
      Status::PendingReuse => "PENDING_REUSE",
      Status::PendingReplacement => "PENDING_REPLACEMENT",
      Status::Dispatching => "DISPATCHING",
      Status::DispatchingSublattice => "DISPATCHING_SUBLATTICE",
      Status::Running => "RUNNING",
      Status::Postprocessing => "POSTPROCESSING",
      Status::Completed => "COMPLETED",
      Status::Failed => "FAILED",
      Status::PostprocessingFailed => "POSTPROCESSING_FAILED",
      Status::Timeout => "TIMEOUT",
      Status::ConnectionLost => "CONNECTION_LOST",
      Status::Cancelled => "CANCELLED",
    }
  }
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "unknown status: {}", self.0)
  }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for Status {
  type Err = UnknownStatus;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Status::ALL
      .into_iter()
      .find(|status| status.as_str().eq_ignore_ascii_case(s))
      .ok_or_else(|| UnknownStatus(s.to_string()))
  }
}
