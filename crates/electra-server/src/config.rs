use std::net::SocketAddr;
use std::path::PathBuf;

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:48008";

/// Configuration for [`serve`](crate::serve).
#[derive(Debug, Clone)]
pub struct ServerConfig {
  pub bind: SocketAddr,
  /// Directory holding the asset store and, by default, the database.
  pub data_dir: PathBuf,
  /// Externally reachable base URL used in `remote_uri`s.
  pub public_url: Option<String>,
  /// Directory the server may import `file://` assets from, for clients
  /// sharing its filesystem. Unset disables local imports.
  pub import_root: Option<PathBuf>,
  /// Overrides the sqlite database in `data_dir`.
  pub database_url: Option<String>,
  /// Capacity of the executor job queue.
  pub job_queue_capacity: usize,
}

impl ServerConfig {
  pub fn new(data_dir: impl Into<PathBuf>, bind: SocketAddr) -> Self {
    Self {
      bind,
      data_dir: data_dir.into(),
      public_url: None,
      import_root: None,
      database_url: None,
      job_queue_capacity: 1024,
    }
  }

  pub fn asset_root(&self) -> PathBuf {
    self.data_dir.join("assets")
  }

  pub fn database_url(&self) -> String {
    match &self.database_url {
      Some(url) => url.clone(),
      None => format!("sqlite://{}", self.data_dir.join("electra.db").display()),
    }
  }
}
