use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Status, StatusCategory};

/// Node-status counts for one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
  pub total: usize,
  pub counts: BTreeMap<String, usize>,
  pub pending: usize,
  pub in_flight: usize,
  pub completed: usize,
  pub failed: usize,
  pub cancelled: usize,
}

impl StatusSummary {
  pub fn from_statuses(statuses: impl IntoIterator<Item = Status>) -> Self {
    let mut summary = Self::default();
    for status in statuses {
      summary.total += 1;
      *summary.counts.entry(status.as_str().to_string()).or_default() += 1;
      match status.category() {
        StatusCategory::Pending => summary.pending += 1,
        StatusCategory::Dispatching | StatusCategory::Running => summary.in_flight += 1,
        StatusCategory::Completed => summary.completed += 1,
        StatusCategory::Failed => summary.failed += 1,
        StatusCategory::Cancelled => summary.cancelled += 1,
      }
    }
    summary
  }

  pub fn all_completed(&self) -> bool {
    self.completed == self.total
  }

  /// Dispatch status implied by the node statuses.
  ///
  /// `can_progress` reports whether any pending node is still schedulable.
  /// Returns `Postprocessing` when every node completed; the caller finishes
  /// the dispatch from there.
  pub fn dispatch_status(&self, can_progress: bool) -> Status {
    if self.in_flight > 0 || can_progress {
      return if self.total == self.pending {
        Status::New
      } else {
        Status::Running
      };
    }
    if self.all_completed() {
      Status::Postprocessing
    } else if self.failed > 0 {
      Status::Failed
    } else if self.cancelled > 0 {
      Status::Cancelled
    } else {
      // Pending nodes with nothing to unblock them.
      Status::Failed
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_running_while_in_flight() {
    let summary = StatusSummary::from_statuses([Status::Completed, Status::Running, Status::New]);
    assert_eq!(summary.in_flight, 1);
    assert_eq!(summary.dispatch_status(false), Status::Running);
  }

  #[test]
  fn test_all_completed_moves_to_postprocessing() {
    let summary = StatusSummary::from_statuses([Status::Completed, Status::Completed]);
    assert!(summary.all_completed());
    assert_eq!(summary.dispatch_status(false), Status::Postprocessing);
  }

  #[test]
  fn test_failure_blocks_dependents() {
    let summary = StatusSummary::from_statuses([Status::Failed, Status::New]);
    assert_eq!(summary.dispatch_status(false), Status::Failed);
    assert_eq!(summary.counts.get("NEW"), Some(&1));
  }

  #[test]
  fn test_cancelled_dispatch() {
    let summary = StatusSummary::from_statuses([Status::Completed, Status::Cancelled]);
    assert_eq!(summary.dispatch_status(false), Status::Cancelled);
  }

  #[test]
  fn test_empty_graph_postprocesses() {
    let summary = StatusSummary::from_statuses([]);
    assert_eq!(summary.dispatch_status(false), Status::Postprocessing);
  }
}
