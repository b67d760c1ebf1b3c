//! Electra Asset
//!
//! This crate provides the asset model and storage backends for electra.
//! Assets are the large payloads of a workflow (serialized callables, inputs,
//! outputs, logs, error text) that travel separately from the workflow's
//! structural description.
//!
//! An [`Asset`] is a descriptor: digest, location and size. The bytes live in
//! an [`AssetStore`], addressed by a bucket and an object name. The
//! [`FsAssetStore`] keeps them on the local filesystem, confined to a root
//! directory, and publishes every write with a single atomic rename.
//!
//! The store API is streaming so large objects never have to be held in
//! memory in one piece.

mod asset;
mod digest;
mod error;
mod fs;

pub use asset::{Asset, AssetPayload, DIGEST_ALGORITHM, file_uri, local_path, scheme_of};
pub use digest::{Digester, sha1_hex};
pub use error::AssetError;
pub use fs::FsAssetStore;

use std::ops::Range;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

/// A boxed stream of bytes for asset data.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, AssetError>> + Send>>;

/// Options for [`AssetStore::put`].
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
  /// Expected number of bytes. A stream that ends early or runs long is
  /// rejected and nothing is published.
  pub length: Option<u64>,
  /// Replace an existing object at the same name. When false, a fresh
  /// object name is generated instead of colliding.
  pub overwrite: bool,
  /// Expected sha1 hex digest of the content.
  pub expected_digest: Option<String>,
}

impl PutOptions {
  pub fn overwrite() -> Self {
    Self {
      overwrite: true,
      ..Self::default()
    }
  }
}

/// Location and fingerprint of an object after a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
  pub bucket: String,
  pub object_name: String,
  pub size: u64,
  /// sha1 hex digest of the bytes written.
  pub digest: String,
}

/// Result of a multi-object delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
  pub deleted: Vec<String>,
  pub failed: Vec<String>,
}

/// Asset storage trait.
///
/// Implementations provide the actual storage backend. Object names may
/// contain `/` separators; backends must refuse any bucket or object name
/// that would address data outside their root.
#[async_trait]
pub trait AssetStore: Send + Sync {
  /// Store an object from a stream of bytes.
  async fn put(
    &self,
    data: ByteStream,
    bucket: &str,
    object_name: &str,
    options: PutOptions,
  ) -> Result<StoredObject, AssetError>;

  /// Retrieve a whole object as a stream.
  async fn get(&self, bucket: &str, object_name: &str) -> Result<ByteStream, AssetError>;

  /// Retrieve the `[start, end)` byte slice of an object as a stream.
  ///
  /// `end` is clamped to the object size.
  async fn get_range(
    &self,
    bucket: &str,
    object_name: &str,
    range: Range<u64>,
  ) -> Result<ByteStream, AssetError>;

  /// Size of a stored object in bytes.
  async fn size(&self, bucket: &str, object_name: &str) -> Result<u64, AssetError>;

  /// Delete several objects from one bucket.
  async fn delete(&self, bucket: &str, object_names: &[String]) -> DeleteOutcome;

  /// URI under which the given object is addressed.
  fn uri(&self, bucket: &str, object_name: &str) -> String;

  /// Map a URI produced by [`AssetStore::uri`] back to `(bucket, object_name)`.
  ///
  /// Returns `None` for URIs that do not belong to this store.
  fn locate(&self, uri: &str) -> Option<(String, String)>;
}

/// Wrap an in-memory buffer as a single-chunk [`ByteStream`].
pub fn stream_from_bytes(data: impl Into<Bytes>) -> ByteStream {
  let data = data.into();
  Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Drain a [`ByteStream`] into one buffer.
pub async fn collect_bytes(mut stream: ByteStream) -> Result<Bytes, AssetError> {
  let mut buf = BytesMut::new();
  while let Some(chunk) = stream.next().await {
    buf.extend_from_slice(&chunk?);
  }
  Ok(buf.freeze())
}
