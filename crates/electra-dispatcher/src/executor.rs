//! The seam between the dispatcher and whatever actually runs task code.
//!
//! The dispatcher never executes a task body. It hands a [`TaskJob`] to the
//! executor named by the node and later receives the outcome through
//! [`Dispatcher::mark_node_ready`](crate::Dispatcher::mark_node_ready).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use electra_graph::NodeId;
use electra_manifest::wire::TaskJob;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExecutorError {
  #[error("unknown executor: {0}")]
  Unknown(String),

  #[error("executor queue is full")]
  QueueFull,

  #[error("executor queue is closed")]
  Closed,

  #[error("executor rejected job: {0}")]
  Rejected(String),
}

/// Runs tasks on behalf of the dispatcher.
///
/// `submit` must return once the job is accepted. Outcomes are reported
/// later and separately, never from inside `submit`.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
  async fn submit(&self, job: TaskJob) -> Result<(), ExecutorError>;

  /// Best-effort request to stop a submitted job.
  async fn cancel(&self, dispatch_id: &str, node_id: NodeId) -> Result<(), ExecutorError>;
}

/// Executors keyed by name, with a default for nodes that name none.
#[derive(Clone)]
pub struct ExecutorRegistry {
  executors: HashMap<String, Arc<dyn TaskExecutor>>,
  default: String,
}

impl ExecutorRegistry {
  pub fn new(default_name: impl Into<String>, executor: Arc<dyn TaskExecutor>) -> Self {
    let default = default_name.into();
    Self {
      executors: HashMap::from([(default.clone(), executor)]),
      default,
    }
  }

  pub fn register(&mut self, name: impl Into<String>, executor: Arc<dyn TaskExecutor>) {
    self.executors.insert(name.into(), executor);
  }

  pub fn default_name(&self) -> &str {
    &self.default
  }

  /// Look up an executor. An empty name selects the default.
  pub fn resolve(&self, name: &str) -> Result<Arc<dyn TaskExecutor>, ExecutorError> {
    let name = if name.is_empty() { &self.default } else { name };
    self
      .executors
      .get(name)
      .cloned()
      .ok_or_else(|| ExecutorError::Unknown(name.to_string()))
  }
}

type JobKey = (String, NodeId);

/// Queue bookkeeping shared by both ends of a [`ChannelExecutor`].
///
/// Only jobs still sitting in the channel can be marked cancelled, so both
/// sets stay bounded by the channel capacity.
#[derive(Default)]
struct QueueState {
  queued: HashSet<JobKey>,
  cancelled: HashSet<JobKey>,
}

type SharedState = Arc<Mutex<QueueState>>;

/// Executor that queues jobs for out-of-process workers to pull.
pub struct ChannelExecutor {
  sender: mpsc::Sender<TaskJob>,
  state: SharedState,
}

/// Receiving end of a [`ChannelExecutor`].
pub struct JobQueue {
  receiver: Mutex<mpsc::Receiver<TaskJob>>,
  state: SharedState,
}

impl ChannelExecutor {
  pub fn new(capacity: usize) -> (Self, JobQueue) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let state = SharedState::default();
    (
      Self {
        sender,
        state: state.clone(),
      },
      JobQueue {
        receiver: Mutex::new(receiver),
        state,
      },
    )
  }
}

#[async_trait]
impl TaskExecutor for ChannelExecutor {
  async fn submit(&self, job: TaskJob) -> Result<(), ExecutorError> {
    let key = (job.dispatch_id.clone(), job.node_id);
    let mut state = self.state.lock().await;
    self.sender.try_send(job).map_err(|err| match err {
      mpsc::error::TrySendError::Full(_) => ExecutorError::QueueFull,
      mpsc::error::TrySendError::Closed(_) => ExecutorError::Closed,
    })?;
    state.cancelled.remove(&key);
    state.queued.insert(key);
    Ok(())
  }

  /// Drops the job if it has not been pulled yet. A pulled job is left to
  /// its worker.
  async fn cancel(&self, dispatch_id: &str, node_id: NodeId) -> Result<(), ExecutorError> {
    let key = (dispatch_id.to_string(), node_id);
    let mut state = self.state.lock().await;
    if state.queued.contains(&key) {
      state.cancelled.insert(key);
    }
    Ok(())
  }
}

impl JobQueue {
  /// Next job that has not been cancelled, waiting up to `wait`.
  pub async fn next(&self, wait: Duration) -> Option<TaskJob> {
    let mut receiver = self.receiver.lock().await;
    let deadline = tokio::time::Instant::now() + wait;

    loop {
      let job = match tokio::time::timeout_at(deadline, receiver.recv()).await {
        Ok(Some(job)) => job,
        Ok(None) | Err(_) => return None,
      };
      let key = (job.dispatch_id.clone(), job.node_id);
      let mut state = self.state.lock().await;
      state.queued.remove(&key);
      if state.cancelled.remove(&key) {
        debug!(dispatch_id = %job.dispatch_id, node_id = %job.node_id, "job_skipped_cancelled");
        continue;
      }
      return Some(job);
    }
  }
}
