/// Error type for asset operations.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
  /// No stored bytes exist for the requested object.
  #[error("asset not found: {bucket}/{object_name}")]
  NotFound { bucket: String, object_name: String },

  /// A bucket or object name resolves outside the store root.
  #[error("path escapes the asset store root: {path}")]
  PathSafety { path: String },

  /// A byte range that cannot be served.
  #[error("invalid byte range {start}..{end} for object of {size} bytes")]
  InvalidRange { start: u64, end: u64, size: u64 },

  /// Content does not match its declared digest.
  #[error("digest mismatch: expected {expected}, got {actual}")]
  DigestMismatch { expected: String, actual: String },

  /// Content does not match its declared length.
  #[error("length mismatch: expected {expected} bytes, got {actual}")]
  LengthMismatch { expected: u64, actual: u64 },

  /// An I/O error occurred.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}
