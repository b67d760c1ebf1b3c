use std::ops::Range;

use bytes::Bytes;
use electra_asset::ByteStream;
use electra_manifest::ResultManifest;
use electra_manifest::wire::JobReport;
use electra_status::Status;

use crate::DispatchError;

/// Outcome of a node as reported by an executor.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
  pub status: Status,
  pub output: Option<Bytes>,
  pub stdout: Option<String>,
  pub stderr: Option<String>,
  pub error: Option<String>,
  /// Child workflow returned by a sub-workflow node.
  pub sublattice: Option<ResultManifest>,
}

impl NodeOutcome {
  pub fn new(status: Status) -> Self {
    Self {
      status,
      output: None,
      stdout: None,
      stderr: None,
      error: None,
      sublattice: None,
    }
  }

  pub fn completed(output: impl Into<Bytes>) -> Self {
    Self {
      output: Some(output.into()),
      ..Self::new(Status::Completed)
    }
  }

  pub fn failed(error: impl Into<String>) -> Self {
    Self {
      error: Some(error.into()),
      ..Self::new(Status::Failed)
    }
  }

  pub fn with_sublattice(mut self, manifest: ResultManifest) -> Self {
    self.sublattice = Some(manifest);
    self
  }
}

impl TryFrom<JobReport> for NodeOutcome {
  type Error = DispatchError;

  fn try_from(report: JobReport) -> Result<Self, Self::Error> {
    let output = report
      .output_bytes()
      .map_err(|err| DispatchError::InvalidRequest(format!("output is not base64: {err}")))?;
    Ok(Self {
      status: report.status,
      output,
      stdout: report.stdout,
      stderr: report.stderr,
      error: report.error,
      sublattice: report.sublattice.map(|manifest| *manifest),
    })
  }
}

/// How [`Dispatcher::register`](crate::Dispatcher::register) treats asset URIs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterOptions {
  /// Copy assets with readable `file://` URIs into the store.
  pub import_local: bool,
  /// Keep URIs that already address objects in the store.
  pub keep_stored: bool,
}

impl RegisterOptions {
  pub fn import_local() -> Self {
    Self {
      import_local: true,
      keep_stored: false,
    }
  }
}

/// Result of a registration.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredDispatch {
  pub dispatch_id: String,
  /// The registered manifest with `remote_uri` set and server locations
  /// removed.
  pub manifest: ResultManifest,
}

/// Sub-region of an archive-encoded asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
  String,
  Object,
}

/// A (possibly partial) asset read.
pub struct AssetRead {
  pub stream: ByteStream,
  /// Size of the whole stored object.
  pub total_size: u64,
  /// Byte range carried by `stream`.
  pub range: Range<u64>,
}

impl AssetRead {
  pub fn is_partial(&self) -> bool {
    self.range.start != 0 || self.range.end != self.total_size
  }

  pub fn len(&self) -> u64 {
    self.range.end - self.range.start
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
