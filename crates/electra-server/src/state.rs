use std::sync::Arc;

use electra_dispatcher::{
  ChannelExecutor, Dispatcher, DispatcherConfig, ExecutorRegistry, JobQueue,
};
use electra_store::SqliteStore;

use crate::{ServerConfig, ServerError};

/// Name under which the built-in job queue executor is registered.
pub const DEFAULT_EXECUTOR: &str = "queue";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
  pub dispatcher: Dispatcher,
  pub jobs: Arc<JobQueue>,
}

impl AppState {
  pub fn new(dispatcher: Dispatcher, jobs: JobQueue) -> Self {
    Self {
      dispatcher,
      jobs: Arc::new(jobs),
    }
  }

  /// Build the dispatcher, its sqlite store and the job queue described by
  /// `config`.
  pub async fn open(config: &ServerConfig) -> Result<Self, ServerError> {
    tokio::fs::create_dir_all(&config.data_dir).await?;
    let store = SqliteStore::connect(&config.database_url()).await?;

    let (executor, jobs) = ChannelExecutor::new(config.job_queue_capacity);
    let executors = ExecutorRegistry::new(DEFAULT_EXECUTOR, Arc::new(executor));

    let mut dispatcher_config = DispatcherConfig::new(config.asset_root());
    dispatcher_config.public_url = config.public_url.clone();
    dispatcher_config.import_root = config.import_root.clone();
    let dispatcher = Dispatcher::open(dispatcher_config, Arc::new(store), executors).await?;
    Ok(Self::new(dispatcher, jobs))
  }
}
