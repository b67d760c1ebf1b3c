use std::ffi::OsString;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::asset::{file_uri, local_path};
use crate::digest::Digester;
use crate::{AssetError, AssetStore, ByteStream, DeleteOutcome, PutOptions, StoredObject};

/// Staging directory, relative to the root, for writes in flight.
const STAGING_DIR: &str = ".tmp";

/// Chunk size used when streaming objects back out.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Filesystem-based asset store.
///
/// Objects are stored at `{root}/{bucket}/{object_name}`. Writes land in
/// `{root}/.tmp` first and are moved into place with one rename, so a reader
/// never observes a partially written object at its final path.
///
/// Every operation resolves the bucket and the object path to absolute,
/// symlink-resolved paths and refuses to proceed unless both are strict
/// descendants of the root.
pub struct FsAssetStore {
  root: PathBuf,
}

impl FsAssetStore {
  /// Open (creating if needed) a store rooted at `root`.
  pub async fn open(root: impl Into<PathBuf>) -> Result<Self, AssetError> {
    let root = root.into();
    fs::create_dir_all(&root).await?;
    let root = fs::canonicalize(&root).await?;
    fs::create_dir_all(root.join(STAGING_DIR)).await?;
    Ok(Self { root })
  }

  /// The canonical root directory.
  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Resolve `bucket` (and optionally `bucket/object_name`) inside the root.
  async fn resolve(&self, bucket: &str, object_name: Option<&str>) -> Result<PathBuf, AssetError> {
    let shown = match object_name {
      Some(object_name) => format!("{bucket}/{object_name}"),
      None => bucket.to_string(),
    };
    let refuse = || AssetError::PathSafety {
      path: shown.clone(),
    };

    let bucket_parts = normal_components(bucket).ok_or_else(refuse)?;
    if bucket_parts.first().is_some_and(|first| first == STAGING_DIR) {
      return Err(refuse());
    }

    let mut joined = self.root.clone();
    joined.extend(&bucket_parts);
    if let Some(object_name) = object_name {
      joined.extend(normal_components(object_name).ok_or_else(refuse)?);
    }

    let resolved = canonicalize_existing(&joined).await?;
    let staging = self.root.join(STAGING_DIR);
    if resolved == self.root || !resolved.starts_with(&self.root) || resolved.starts_with(&staging) {
      warn!(path = %shown, "refusing asset path outside the store root");
      return Err(refuse());
    }
    Ok(resolved)
  }

  /// Resolve and open an existing object for reading.
  async fn open_object(&self, bucket: &str, object_name: &str) -> Result<(File, u64), AssetError> {
    self.resolve(bucket, None).await?;
    let path = self.resolve(bucket, Some(object_name)).await?;
    let not_found = || AssetError::NotFound {
      bucket: bucket.to_string(),
      object_name: object_name.to_string(),
    };

    let metadata = match fs::metadata(&path).await {
      Ok(metadata) => metadata,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
      Err(e) => return Err(e.into()),
    };
    if !metadata.is_file() {
      return Err(not_found());
    }

    let file = File::open(&path).await.map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        not_found()
      } else {
        AssetError::Io(e)
      }
    })?;
    Ok((file, metadata.len()))
  }
}

#[async_trait]
impl AssetStore for FsAssetStore {
  async fn put(
    &self,
    data: ByteStream,
    bucket: &str,
    object_name: &str,
    options: PutOptions,
  ) -> Result<StoredObject, AssetError> {
    self.resolve(bucket, None).await?;
    let mut object_name = object_name.to_string();
    let mut target = self.resolve(bucket, Some(&object_name)).await?;

    if !options.overwrite && fs::try_exists(&target).await? {
      object_name = format!("{object_name}-{}", uuid::Uuid::new_v4().simple());
      target = self.resolve(bucket, Some(&object_name)).await?;
    }

    let staging = self.root.join(STAGING_DIR);
    fs::create_dir_all(&staging).await?;
    let tmp_path = staging.join(uuid::Uuid::new_v4().simple().to_string());

    let published: Result<(String, u64), AssetError> = async {
      let (digest, size) = write_staged(&tmp_path, data, &options).await?;
      if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
      }
      fs::rename(&tmp_path, &target).await?;
      Ok((digest, size))
    }
    .await;

    match published {
      Ok((digest, size)) => {
        debug!(bucket, object_name = %object_name, size, "asset stored");
        Ok(StoredObject {
          bucket: bucket.to_string(),
          object_name,
          size,
          digest,
        })
      }
      Err(e) => {
        let _ = fs::remove_file(&tmp_path).await;
        warn!(bucket, object_name = %object_name, error = %e, "asset write failed");
        Err(e)
      }
    }
  }

  async fn get(&self, bucket: &str, object_name: &str) -> Result<ByteStream, AssetError> {
    let (file, _) = self.open_object(bucket, object_name).await?;
    let stream =
      ReaderStream::with_capacity(file, READ_CHUNK_SIZE).map(|r| r.map_err(AssetError::Io));
    Ok(Box::pin(stream))
  }

  async fn get_range(
    &self,
    bucket: &str,
    object_name: &str,
    range: Range<u64>,
  ) -> Result<ByteStream, AssetError> {
    let (mut file, size) = self.open_object(bucket, object_name).await?;
    if range.end < range.start || range.start > size {
      return Err(AssetError::InvalidRange {
        start: range.start,
        end: range.end,
        size,
      });
    }
    let end = range.end.min(size);

    file.seek(SeekFrom::Start(range.start)).await?;
    let reader = file.take(end - range.start);
    let stream =
      ReaderStream::with_capacity(reader, READ_CHUNK_SIZE).map(|r| r.map_err(AssetError::Io));
    Ok(Box::pin(stream))
  }

  async fn size(&self, bucket: &str, object_name: &str) -> Result<u64, AssetError> {
    let (_, size) = self.open_object(bucket, object_name).await?;
    Ok(size)
  }

  async fn delete(&self, bucket: &str, object_names: &[String]) -> DeleteOutcome {
    let mut outcome = DeleteOutcome::default();
    for object_name in object_names {
      let removed = match self.resolve(bucket, Some(object_name)).await {
        Ok(path) => fs::remove_file(&path).await.map_err(AssetError::Io),
        Err(e) => Err(e),
      };
      match removed {
        Ok(()) => outcome.deleted.push(object_name.clone()),
        Err(e) => {
          debug!(bucket, object_name = %object_name, error = %e, "asset delete failed");
          outcome.failed.push(object_name.clone());
        }
      }
    }
    outcome
  }

  fn uri(&self, bucket: &str, object_name: &str) -> String {
    file_uri(&self.root.join(bucket).join(object_name))
  }

  fn locate(&self, uri: &str) -> Option<(String, String)> {
    let path = local_path(uri)?;
    let relative = path.strip_prefix(&self.root).ok()?;
    let mut components = relative.components();
    let bucket = match components.next()? {
      Component::Normal(bucket) => bucket.to_str()?.to_string(),
      _ => return None,
    };
    let object_name = components.as_path().to_str()?.to_string();
    if object_name.is_empty() {
      return None;
    }
    Some((bucket, object_name))
  }
}

/// Split a relative name into plain components, refusing `..`, roots and
/// prefixes. `.` components are dropped.
fn normal_components(name: &str) -> Option<Vec<OsString>> {
  let mut parts = Vec::new();
  for component in Path::new(name).components() {
    match component {
      Component::Normal(part) => parts.push(part.to_os_string()),
      Component::CurDir => {}
      Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
    }
  }
  if parts.is_empty() { None } else { Some(parts) }
}

/// Canonicalize the longest existing ancestor of `path` and re-append the
/// components that do not exist yet.
async fn canonicalize_existing(path: &Path) -> Result<PathBuf, AssetError> {
  let mut missing: Vec<OsString> = Vec::new();
  let mut current = path.to_path_buf();
  loop {
    match fs::canonicalize(&current).await {
      Ok(mut resolved) => {
        for part in missing.iter().rev() {
          resolved.push(part);
        }
        return Ok(resolved);
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        let Some(name) = current.file_name().map(|n| n.to_os_string()) else {
          return Err(e.into());
        };
        missing.push(name);
        if !current.pop() {
          return Err(e.into());
        }
      }
      Err(e) => return Err(e.into()),
    }
  }
}

/// Write a stream to the staging path, checking length and digest.
async fn write_staged(
  path: &Path,
  mut data: ByteStream,
  options: &PutOptions,
) -> Result<(String, u64), AssetError> {
  let mut file = File::create(path).await?;
  let mut digester = Digester::new();

  while let Some(chunk) = data.next().await {
    let chunk = chunk?;
    digester.update(&chunk);
    if let Some(expected) = options.length
      && digester.size() > expected
    {
      return Err(AssetError::LengthMismatch {
        expected,
        actual: digester.size(),
      });
    }
    file.write_all(&chunk).await?;
  }

  file.flush().await?;
  file.sync_all().await?;

  let (digest, size) = digester.finish();
  if let Some(expected) = options.length
    && size != expected
  {
    return Err(AssetError::LengthMismatch {
      expected,
      actual: size,
    });
  }
  if let Some(expected) = &options.expected_digest
    && expected != &digest
  {
    return Err(AssetError::DigestMismatch {
      expected: expected.clone(),
      actual: digest,
    });
  }
  Ok((digest, size))
}
