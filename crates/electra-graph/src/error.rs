use thiserror::Error;

use crate::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphIntegrityError {
  #[error("node not found: {0}")]
  MissingNode(NodeId),

  #[error("edge {from} -> {to} would introduce a cycle")]
  Cycle { from: NodeId, to: NodeId },

  #[error("node ids must be dense: expected {expected}, got {actual}")]
  NonDenseIds { expected: NodeId, actual: NodeId },

  #[error("graph contains a cycle")]
  Cyclic,
}
