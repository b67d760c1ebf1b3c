use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::digest::sha1_hex;
use crate::error::AssetError;

/// Name recorded in [`Asset::digest_alg`] for every digest electra computes.
pub const DIGEST_ALGORITHM: &str = "sha1";

/// A digest-addressed, URI-located blob descriptor.
///
/// `uri` is where the bytes live from the point of view of whoever holds the
/// descriptor. `remote_uri` is filled in by the server during registration
/// and tells a client where to upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub digest_alg: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub digest: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub uri: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub remote_uri: Option<String>,
  #[serde(default)]
  pub size: u64,
}

impl Asset {
  /// Describe `data` located at `uri`.
  pub fn for_bytes(data: &[u8], uri: impl Into<String>) -> Self {
    Self {
      digest_alg: Some(DIGEST_ALGORITHM.to_string()),
      digest: Some(sha1_hex(data)),
      uri: Some(uri.into()),
      remote_uri: None,
      size: data.len() as u64,
    }
  }

  /// Check `data` against the recorded digest.
  ///
  /// An asset without a digest accepts any content.
  pub fn verify(&self, data: &[u8]) -> Result<(), AssetError> {
    match &self.digest {
      Some(expected) => {
        let actual = sha1_hex(data);
        if &actual == expected {
          Ok(())
        } else {
          Err(AssetError::DigestMismatch {
            expected: expected.clone(),
            actual,
          })
        }
      }
      None => Ok(()),
    }
  }

  /// Scheme of the local URI, if any.
  pub fn scheme(&self) -> Option<&str> {
    self.uri.as_deref().and_then(scheme_of)
  }
}

/// The payload behind an asset slot.
///
/// Workflows are built with inline bytes; once serialized (or received from
/// a peer) every slot refers to stored bytes by descriptor only.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetPayload {
  Inline(Bytes),
  Stored(Asset),
}

impl AssetPayload {
  pub fn inline(data: impl Into<Bytes>) -> Self {
    Self::Inline(data.into())
  }

  /// Digest of the payload, computing it for inline bytes.
  pub fn digest(&self) -> Option<String> {
    match self {
      Self::Inline(data) => Some(sha1_hex(data)),
      Self::Stored(asset) => asset.digest.clone(),
    }
  }

  pub fn size(&self) -> u64 {
    match self {
      Self::Inline(data) => data.len() as u64,
      Self::Stored(asset) => asset.size,
    }
  }

  pub fn as_asset(&self) -> Option<&Asset> {
    match self {
      Self::Stored(asset) => Some(asset),
      Self::Inline(_) => None,
    }
  }
}

impl From<Asset> for AssetPayload {
  fn from(asset: Asset) -> Self {
    Self::Stored(asset)
  }
}

/// The scheme part of a `scheme://path` URI.
pub fn scheme_of(uri: &str) -> Option<&str> {
  uri.split_once("://").map(|(scheme, _)| scheme)
}

/// Build a `file://` URI for an absolute path.
pub fn file_uri(path: &Path) -> String {
  format!("file://{}", path.display())
}

/// Path behind a `file://` URI.
pub fn local_path(uri: &str) -> Option<PathBuf> {
  uri.strip_prefix("file://").map(PathBuf::from)
}
