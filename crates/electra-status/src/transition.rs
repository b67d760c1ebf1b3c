use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Status, StatusTransitionError};

/// Which lifecycle a transition is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
  /// A node. `sublattice` is true for nodes that expand into a child dispatch.
  Node { sublattice: bool },
  Dispatch,
}

impl fmt::Display for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Scope::Node { .. } => f.write_str("node"),
      Scope::Dispatch => f.write_str("dispatch"),
    }
  }
}

/// Outcome of an accepted update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
  Applied,
  /// The target equals the current status; nothing changes. Repeated
  /// terminal reports land here.
  Unchanged,
}

/// Decide whether `from -> to` is legal in `scope`.
pub fn check_transition(
  scope: Scope,
  from: Status,
  to: Status,
) -> Result<Transition, StatusTransitionError> {
  if from == to {
    return Ok(Transition::Unchanged);
  }

  let allowed = match scope {
    Scope::Node { sublattice } => node_allows(from, to, sublattice),
    Scope::Dispatch => dispatch_allows(from, to),
  };

  if allowed {
    Ok(Transition::Applied)
  } else {
    Err(StatusTransitionError { scope, from, to })
  }
}

fn node_allows(from: Status, to: Status, sublattice: bool) -> bool {
  use Status::*;

  match from {
    New | PendingReplacement => matches!(to, Dispatching | Running | Failed | Cancelled),
    PendingReuse => matches!(to, Completed | Dispatching | Running | Cancelled),
    Dispatching => matches!(
      to,
      Running | Completed | Failed | Cancelled | Timeout | ConnectionLost
    ),
    Running => match to {
      DispatchingSublattice => sublattice,
      Completed | Failed | Cancelled | Timeout | ConnectionLost => true,
      _ => false,
    },
    // Folding a child dispatch back always passes through RUNNING.
    DispatchingSublattice => matches!(to, Running | Failed | Cancelled),
    _ => false,
  }
}

fn dispatch_allows(from: Status, to: Status) -> bool {
  use Status::*;

  match from {
    New | PendingReuse | PendingReplacement => {
      matches!(to, Dispatching | Running | Failed | Cancelled)
    }
    Dispatching => matches!(to, Running | Failed | Cancelled),
    Running => matches!(
      to,
      Postprocessing | Completed | Failed | Cancelled | Timeout | ConnectionLost
    ),
    Completed => to == Postprocessing,
    Postprocessing => matches!(to, Completed | PostprocessingFailed | Cancelled),
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const NODE: Scope = Scope::Node { sublattice: false };
  const SUBLATTICE: Scope = Scope::Node { sublattice: true };

  #[test]
  fn test_node_happy_path() {
    assert_eq!(
      check_transition(NODE, Status::New, Status::Dispatching),
      Ok(Transition::Applied)
    );
    assert_eq!(
      check_transition(NODE, Status::Dispatching, Status::Running),
      Ok(Transition::Applied)
    );
    assert_eq!(
      check_transition(NODE, Status::Running, Status::Completed),
      Ok(Transition::Applied)
    );
  }

  #[test]
  fn test_repeated_terminal_is_unchanged() {
    for status in [Status::Completed, Status::Failed, Status::Cancelled] {
      assert_eq!(
        check_transition(NODE, status, status),
        Ok(Transition::Unchanged)
      );
    }
  }

  #[test]
  fn test_completed_after_cancelled_is_rejected() {
    let err = check_transition(NODE, Status::Cancelled, Status::Completed).unwrap_err();
    assert_eq!(err.from, Status::Cancelled);
    assert_eq!(err.to, Status::Completed);
    assert_eq!(
      err.to_string(),
      "invalid node status transition: CANCELLED -> COMPLETED"
    );
  }

  #[test]
  fn test_terminal_node_is_never_overwritten() {
    for from in Status::ALL.into_iter().filter(|s| s.is_terminal()) {
      for to in Status::ALL.into_iter().filter(|to| *to != from) {
        assert!(check_transition(SUBLATTICE, from, to).is_err(), "{from} -> {to}");
      }
    }
  }

  #[test]
  fn test_sublattice_expansion_requires_flag() {
    assert!(check_transition(NODE, Status::Running, Status::DispatchingSublattice).is_err());
    assert_eq!(
      check_transition(SUBLATTICE, Status::Running, Status::DispatchingSublattice),
      Ok(Transition::Applied)
    );
    assert!(check_transition(SUBLATTICE, Status::DispatchingSublattice, Status::Completed).is_err());
    assert_eq!(
      check_transition(SUBLATTICE, Status::DispatchingSublattice, Status::Running),
      Ok(Transition::Applied)
    );
  }

  #[test]
  fn test_postprocessing_is_dispatch_scope_only() {
    assert!(check_transition(NODE, Status::Completed, Status::Postprocessing).is_err());
    assert!(check_transition(NODE, Status::Running, Status::Postprocessing).is_err());
    assert_eq!(
      check_transition(Scope::Dispatch, Status::Running, Status::Postprocessing),
      Ok(Transition::Applied)
    );
    assert_eq!(
      check_transition(Scope::Dispatch, Status::Completed, Status::Postprocessing),
      Ok(Transition::Applied)
    );
    assert_eq!(
      check_transition(
        Scope::Dispatch,
        Status::Postprocessing,
        Status::PostprocessingFailed
      ),
      Ok(Transition::Applied)
    );
    assert!(
      check_transition(Scope::Dispatch, Status::PostprocessingFailed, Status::Completed).is_err()
    );
  }

  #[test]
  fn test_reused_node_completes_directly() {
    assert_eq!(
      check_transition(NODE, Status::PendingReuse, Status::Completed),
      Ok(Transition::Applied)
    );
    assert!(check_transition(NODE, Status::New, Status::Completed).is_err());
  }
}
