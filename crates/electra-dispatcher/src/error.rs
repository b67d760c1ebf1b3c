use electra_archive::ArchiveError;
use electra_asset::AssetError;
use electra_graph::NodeId;
use electra_manifest::ManifestError;
use electra_result::ResultError;
use electra_status::StatusTransitionError;
use electra_store::StoreError;
use thiserror::Error;

use crate::ExecutorError;

#[derive(Debug, Error)]
pub enum DispatchError {
  #[error("dispatch not found: {0}")]
  NotFound(String),

  #[error("node {node_id} not found in dispatch {dispatch_id}")]
  NodeNotFound { dispatch_id: String, node_id: NodeId },

  #[error("asset not found: {0}")]
  AssetNotFound(String),

  #[error("dispatch already exists: {0}")]
  AlreadyExists(String),

  #[error("invalid manifest: {0}")]
  InvalidManifest(String),

  #[error("invalid request: {0}")]
  InvalidRequest(String),

  #[error("range starts beyond object of {size} bytes")]
  RangeNotSatisfiable { size: u64 },

  #[error(transparent)]
  Transition(#[from] StatusTransitionError),

  #[error("sublattice expansion failed: {0}")]
  SublatticeExpansion(String),

  #[error("asset error: {0}")]
  Asset(#[from] AssetError),

  #[error("manifest error: {0}")]
  Manifest(#[from] ManifestError),

  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("archive error: {0}")]
  Archive(#[from] ArchiveError),

  #[error("executor error: {0}")]
  Executor(#[from] ExecutorError),

  #[error("wait cancelled")]
  Cancelled,

  #[error("timed out waiting for dispatch")]
  Timeout,

  #[error("dispatch worker for {0} has stopped")]
  WorkerStopped(String),
}

impl DispatchError {
  pub(crate) fn from_result(dispatch_id: &str, err: ResultError) -> Self {
    match err {
      ResultError::NodeNotFound(node_id) => DispatchError::NodeNotFound {
        dispatch_id: dispatch_id.to_string(),
        node_id,
      },
      ResultError::Transition(err) => DispatchError::Transition(err),
      ResultError::Manifest(err) => DispatchError::Manifest(err),
    }
  }

  /// Map store lookups of a missing dispatch to [`DispatchError::NotFound`].
  pub(crate) fn from_store(err: StoreError) -> Self {
    match err {
      StoreError::NotFound(id) => DispatchError::NotFound(id),
      other => DispatchError::Store(other),
    }
  }
}
