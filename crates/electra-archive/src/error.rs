use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("buffer truncated: need {needed} bytes, have {available}")]
  Truncated { needed: u64, available: u64 },

  #[error("inconsistent offsets: string at {string_offset}, data at {data_offset}")]
  InvalidOffsets { string_offset: u64, data_offset: u64 },

  #[error("unexpected trailing bytes: envelope ends at {expected}, buffer is {actual}")]
  TrailingBytes { expected: u64, actual: u64 },

  #[error("invalid header: {0}")]
  Header(#[from] serde_json::Error),

  #[error("object string is not valid utf-8: {0}")]
  Utf8(#[from] std::string::FromUtf8Error),
}
