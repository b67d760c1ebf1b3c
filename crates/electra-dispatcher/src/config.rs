use std::path::PathBuf;

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
  /// Root directory of the filesystem asset store.
  pub asset_root: PathBuf,
  /// Externally reachable base URL, used to build `remote_uri`s. When unset,
  /// `remote_uri`s are server-relative paths.
  pub public_url: Option<String>,
  /// Directory that registrations may import `file://` assets from. Local
  /// imports are refused while unset.
  pub import_root: Option<PathBuf>,
  /// Capacity of each dispatch's status-update queue.
  pub status_queue_capacity: usize,
  /// Capacity of each dispatch's event broadcast channel.
  pub event_capacity: usize,
}

impl DispatcherConfig {
  pub fn new(asset_root: impl Into<PathBuf>) -> Self {
    Self {
      asset_root: asset_root.into(),
      public_url: None,
      import_root: None,
      status_queue_capacity: 256,
      event_capacity: 256,
    }
  }

  pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
    self.public_url = Some(url.into());
    self
  }

  pub fn with_import_root(mut self, root: impl Into<PathBuf>) -> Self {
    self.import_root = Some(root.into());
    self
  }
}
