use electra_graph::NodeId;
use electra_manifest::ManifestError;
use electra_status::StatusTransitionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResultError {
  #[error("node {0} not found")]
  NodeNotFound(NodeId),

  #[error(transparent)]
  Transition(#[from] StatusTransitionError),

  #[error(transparent)]
  Manifest(#[from] ManifestError),
}
