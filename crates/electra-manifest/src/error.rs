use electra_graph::GraphIntegrityError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("unsupported manifest schema version {0}")]
  UnsupportedSchema(u32),

  #[error("invalid task graph: {0}")]
  Graph(#[from] GraphIntegrityError),

  #[error("asset {0} has not been serialized")]
  InlinePayload(String),

  #[error("response references unknown asset {0}")]
  UnknownAsset(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}
