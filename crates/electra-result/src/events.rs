//! Status events for observers of a dispatch.

use electra_graph::NodeId;
use electra_status::Status;
use serde::{Deserialize, Serialize};

/// Events published on a dispatch's broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
  /// A node moved to a new status.
  NodeStatusChanged {
    dispatch_id: String,
    node_id: NodeId,
    status: Status,
    detail: Option<String>,
  },

  /// The dispatch itself moved to a new status.
  DispatchStatusChanged { dispatch_id: String, status: Status },
}

impl DispatchEvent {
  pub fn dispatch_id(&self) -> &str {
    match self {
      DispatchEvent::NodeStatusChanged { dispatch_id, .. }
      | DispatchEvent::DispatchStatusChanged { dispatch_id, .. } => dispatch_id,
    }
  }
}
