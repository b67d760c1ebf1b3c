//! The per-dispatch worker.
//!
//! Every change to a live dispatch is a [`StatusMessage`] on that dispatch's
//! queue. The worker takes messages one at a time, so updates for one
//! dispatch are applied in the order they were enqueued and never race each
//! other, while each dispatch has its own worker.

use std::sync::Arc;

use electra_asset::AssetPayload;
use electra_graph::{Node, NodeAssetKey, NodeId};
use electra_manifest::wire::{JobArgument, TaskJob};
use electra_manifest::{AssetLocator, Dispatch, DispatchAssetKey, ResultManifest};
use electra_result::{NodeUpdate, ParentLink, ResultError, ResultStore};
use electra_status::{Status, Transition};
use electra_store::ElectronRecord;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{DispatchError, Dispatcher, NodeOutcome, RegisterOptions};

type Reply<T> = oneshot::Sender<Result<T, DispatchError>>;

pub(crate) enum StatusMessage {
  Start {
    reply: Reply<()>,
  },
  NodeReport {
    node_id: NodeId,
    outcome: NodeOutcome,
    reply: Reply<Transition>,
  },
  /// A child dispatch spawned by `node_id` reached a terminal status.
  SublatticeFinished {
    node_id: NodeId,
    child_id: String,
    status: Status,
  },
  Cancel {
    reply: Reply<()>,
  },
}

/// Process messages for one dispatch until shutdown or until the dispatch
/// is dropped from the registry.
pub(crate) async fn run(
  dispatcher: Dispatcher,
  result: Arc<ResultStore>,
  mut receiver: mpsc::Receiver<StatusMessage>,
  shutdown: CancellationToken,
) {
  let worker = Worker {
    dispatch_id: result.dispatch_id().to_string(),
    dispatcher,
    result,
  };

  loop {
    let message = tokio::select! {
      _ = shutdown.cancelled() => break,
      message = receiver.recv() => match message {
        Some(message) => message,
        None => break,
      },
    };
    worker.handle(message).await;
  }
  debug!(dispatch_id = %worker.dispatch_id, "dispatch_worker_stopped");
}

/// Electron row for the current state of `node`.
pub(crate) fn electron_record(dispatch_id: &str, node: &Node) -> ElectronRecord {
  ElectronRecord {
    dispatch_id: dispatch_id.to_string(),
    node_id: node.id.0 as i64,
    name: node.name.clone(),
    status: node.status.as_str().to_string(),
    sub_dispatch_id: node.sub_dispatch_id.clone(),
    started_at: node.start_time,
    completed_at: node.end_time,
  }
}

/// Executor name for a node, falling back to the lattice default.
fn executor_name(dispatch: &Dispatch, node: &Node) -> String {
  if node.executor.name.is_empty() {
    dispatch.lattice.metadata.executor.name.clone()
  } else {
    node.executor.name.clone()
  }
}

fn stored(payload: Option<&AssetPayload>) -> Option<electra_asset::Asset> {
  payload.and_then(AssetPayload::as_asset).cloned()
}

/// Build the job for `node_id`, binding each argument to the output of its
/// source node.
fn build_job(dispatch: &Dispatch, node_id: NodeId) -> Option<(bool, TaskJob)> {
  let graph = dispatch.graph();
  let node = graph.get_node(node_id)?;

  let mut executor = node.executor.clone();
  executor.name = executor_name(dispatch, node);
  let arguments = graph
    .incoming_edges(node_id)
    .into_iter()
    .map(|edge| JobArgument {
      source: edge.source,
      binding: edge.attrs.clone(),
      value: stored(
        graph
          .get_node(edge.source)
          .and_then(|source| source.asset(NodeAssetKey::Output)),
      ),
    })
    .collect();

  let job = TaskJob {
    dispatch_id: dispatch.id().to_string(),
    node_id,
    name: node.name.clone(),
    executor,
    sublattice: node.sublattice,
    function: stored(node.asset(NodeAssetKey::Function)),
    value: stored(node.asset(NodeAssetKey::Value)),
    arguments,
  };
  Some((node.is_parameter(), job))
}

struct Worker {
  dispatch_id: String,
  dispatcher: Dispatcher,
  result: Arc<ResultStore>,
}

impl Worker {
  async fn handle(&self, message: StatusMessage) {
    match message {
      StatusMessage::Start { reply } => {
        let _ = reply.send(self.start().await);
      }
      StatusMessage::NodeReport {
        node_id,
        outcome,
        reply,
      } => {
        let _ = reply.send(self.report(node_id, outcome).await);
      }
      StatusMessage::SublatticeFinished {
        node_id,
        child_id,
        status,
      } => {
        if let Err(err) = self.fold(node_id, &child_id, status).await {
          warn!(
            dispatch_id = %self.dispatch_id,
            node_id = %node_id,
            child_id = %child_id,
            error = %err,
            "sublattice_fold_failed"
          );
        }
      }
      StatusMessage::Cancel { reply } => {
        let _ = reply.send(self.cancel().await);
      }
    }
  }

  fn lift(&self, err: ResultError) -> DispatchError {
    DispatchError::from_result(&self.dispatch_id, err)
  }

  // ---------------------------------------------------------------------------
  // Message handlers
  // ---------------------------------------------------------------------------

  async fn start(&self) -> Result<(), DispatchError> {
    if self.result.status() != Status::New {
      return Ok(());
    }
    self
      .result
      .set_dispatch_status(Status::Running)
      .await
      .map_err(|err| self.lift(err))?;
    self.persist().await?;

    for node_id in self.result.pending_reuse().await {
      self
        .apply(NodeUpdate::new(node_id, Status::Completed).with_detail("reused previous result"))
        .await?;
    }
    info!(dispatch_id = %self.dispatch_id, "dispatch_started");
    self.advance().await
  }

  async fn report(&self, node_id: NodeId, outcome: NodeOutcome) -> Result<Transition, DispatchError> {
    let transition = self
      .result
      .check_node(node_id, outcome.status)
      .await
      .map_err(|err| self.lift(err))?;
    if transition == Transition::Unchanged {
      debug!(dispatch_id = %self.dispatch_id, node_id = %node_id, "duplicate_report_ignored");
      return Ok(transition);
    }

    let sublattice = self
      .result
      .with_dispatch(|dispatch| {
        dispatch
          .graph()
          .get_node(node_id)
          .is_some_and(|node| node.sublattice)
      })
      .await;
    if let (true, Status::Completed, Some(manifest)) =
      (sublattice, outcome.status, outcome.sublattice.clone())
    {
      self.expand(node_id, manifest).await?;
      self.advance_logged().await;
      return Ok(Transition::Applied);
    }

    let mut update = NodeUpdate::new(node_id, outcome.status);
    if let Some(output) = outcome.output {
      update = update.with_asset(NodeAssetKey::Output, self.node_asset(node_id, NodeAssetKey::Output, output).await?);
    }
    for (key, text) in [
      (NodeAssetKey::Stdout, outcome.stdout),
      (NodeAssetKey::Stderr, outcome.stderr),
      (NodeAssetKey::Error, outcome.error.clone()),
    ] {
      if let Some(text) = text {
        update = update.with_asset(key, self.node_asset(node_id, key, text).await?);
      }
    }
    if let Some(error) = outcome.error {
      update = update.with_detail(error);
    }

    let transition = self.apply(update).await?;
    info!(
      dispatch_id = %self.dispatch_id,
      node_id = %node_id,
      status = %outcome.status,
      "node_reported"
    );
    self.advance_logged().await;
    Ok(transition)
  }

  /// Turn a completed sub-workflow node into a child dispatch.
  async fn expand(&self, node_id: NodeId, manifest: ResultManifest) -> Result<(), DispatchError> {
    self.apply(NodeUpdate::new(node_id, Status::Running)).await?;

    let child_id = match self.register_child(node_id, manifest).await {
      Ok(child_id) => child_id,
      Err(err) => {
        let err = DispatchError::SublatticeExpansion(err.to_string());
        warn!(dispatch_id = %self.dispatch_id, node_id = %node_id, error = %err, "sublattice_expansion_failed");
        return self.fail_node(node_id, err.to_string()).await;
      }
    };
    self
      .apply(NodeUpdate::new(node_id, Status::DispatchingSublattice).with_sub_dispatch(child_id.clone()))
      .await?;
    info!(
      dispatch_id = %self.dispatch_id,
      node_id = %node_id,
      child_id = %child_id,
      "sublattice_dispatched"
    );

    let dispatcher = self.dispatcher.clone();
    let parent_id = self.dispatch_id.clone();
    tokio::spawn(async move {
      if let Err(err) = dispatcher.start(&child_id).await {
        warn!(dispatch_id = %parent_id, child_id = %child_id, error = %err, "sublattice_start_failed");
        dispatcher.notify(
          parent_id,
          StatusMessage::SublatticeFinished {
            node_id,
            child_id,
            status: Status::Failed,
          },
        );
      }
    });
    Ok(())
  }

  async fn register_child(&self, node_id: NodeId, mut manifest: ResultManifest) -> Result<String, DispatchError> {
    electra_manifest::reset(&mut manifest);
    manifest.metadata.dispatch_id = String::new();
    manifest.metadata.root_dispatch_id = self
      .result
      .with_dispatch(|dispatch| dispatch.metadata.root_dispatch_id.clone())
      .await;

    let parent = ParentLink {
      dispatch_id: self.dispatch_id.clone(),
      node_id,
    };
    let registered = self
      .dispatcher
      .register_internal(manifest, RegisterOptions::import_local(), Some(parent))
      .await?;
    Ok(registered.dispatch_id)
  }

  /// Fold the terminal status of a child dispatch into its parent node.
  async fn fold(&self, node_id: NodeId, child_id: &str, status: Status) -> Result<(), DispatchError> {
    let waiting = self
      .result
      .with_dispatch(|dispatch| {
        dispatch.graph().get_node(node_id).is_some_and(|node| {
          node.status == Status::DispatchingSublattice
            && node.sub_dispatch_id.as_deref() == Some(child_id)
        })
      })
      .await;
    if !waiting {
      debug!(dispatch_id = %self.dispatch_id, node_id = %node_id, child_id = %child_id, "stale_sublattice_result");
      return Ok(());
    }

    self.apply(NodeUpdate::new(node_id, Status::Running)).await?;
    match status {
      Status::Completed => {
        let child = self.dispatcher.load_manifest(child_id).await?;
        let mut update = NodeUpdate::new(node_id, Status::Completed);
        if let Some(result) = child.asset(AssetLocator::Dispatch(DispatchAssetKey::Result)) {
          let locator = AssetLocator::Node(node_id, NodeAssetKey::Output);
          match self.dispatcher.copy_asset(result, &self.dispatch_id, locator).await {
            Ok(output) => update = update.with_asset(NodeAssetKey::Output, output.into()),
            Err(err) => {
              self
                .fail_node(node_id, format!("cannot copy result of sublattice {child_id}: {err}"))
                .await?;
              return self.advance().await;
            }
          }
        }
        self.apply(update).await?;
      }
      Status::Cancelled => {
        self
          .apply(NodeUpdate::new(node_id, Status::Cancelled).with_detail("sublattice cancelled"))
          .await?;
      }
      other => {
        self
          .fail_node(node_id, format!("sublattice dispatch {child_id} finished with status {other}"))
          .await?;
      }
    }
    info!(dispatch_id = %self.dispatch_id, node_id = %node_id, child_id = %child_id, status = %status, "sublattice_folded");
    self.advance().await
  }

  async fn cancel(&self) -> Result<(), DispatchError> {
    if self.result.status().is_terminal() {
      return Ok(());
    }

    let open: Vec<(NodeId, Status, String, Option<String>)> = self
      .result
      .with_dispatch(|dispatch| {
        dispatch
          .graph()
          .nodes()
          .filter(|node| !node.status.is_terminal())
          .map(|node| {
            (
              node.id,
              node.status,
              executor_name(dispatch, node),
              node.sub_dispatch_id.clone(),
            )
          })
          .collect()
      })
      .await;

    for (node_id, status, executor, child) in open {
      match (status, child) {
        (Status::DispatchingSublattice, Some(child_id)) => {
          let dispatcher = self.dispatcher.clone();
          tokio::spawn(async move {
            if let Err(err) = dispatcher.cancel(&child_id).await {
              warn!(child_id = %child_id, error = %err, "sublattice_cancel_failed");
            }
          });
        }
        (status, _) if status.is_in_flight() => {
          let cancelled = match self.dispatcher.executors().resolve(&executor) {
            Ok(executor) => executor.cancel(&self.dispatch_id, node_id).await,
            Err(err) => Err(err),
          };
          if let Err(err) = cancelled {
            warn!(dispatch_id = %self.dispatch_id, node_id = %node_id, error = %err, "executor_cancel_failed");
          }
        }
        _ => {}
      }
      self
        .apply(NodeUpdate::new(node_id, Status::Cancelled).with_detail("dispatch cancelled"))
        .await?;
    }

    self.finish(Status::Cancelled).await
  }

  // ---------------------------------------------------------------------------
  // Scheduling
  // ---------------------------------------------------------------------------

  async fn advance_logged(&self) {
    if let Err(err) = self.advance().await {
      warn!(dispatch_id = %self.dispatch_id, error = %err, "dispatch_advance_failed");
    }
  }

  /// Hand every ready node to its executor, then finish the dispatch if
  /// nothing is left to run.
  async fn advance(&self) -> Result<(), DispatchError> {
    if self.result.status() != Status::Running {
      return Ok(());
    }

    loop {
      let ready = self.result.ready_nodes().await;
      if ready.is_empty() {
        break;
      }
      for node_id in ready {
        self.dispatch_node(node_id).await?;
      }
    }

    match self.result.derived_status().await {
      Status::Postprocessing => self.postprocess().await,
      Status::Failed => {
        self.record_failure().await?;
        self.finish(Status::Failed).await
      }
      Status::Cancelled => self.finish(Status::Cancelled).await,
      _ => Ok(()),
    }
  }

  async fn dispatch_node(&self, node_id: NodeId) -> Result<(), DispatchError> {
    let (parameter, job) = self
      .result
      .with_dispatch(|dispatch| build_job(dispatch, node_id))
      .await
      .ok_or_else(|| DispatchError::NodeNotFound {
        dispatch_id: self.dispatch_id.clone(),
        node_id,
      })?;

    if parameter {
      self.apply(NodeUpdate::new(node_id, Status::Running)).await?;
      let mut update = NodeUpdate::new(node_id, Status::Completed);
      if let Some(value) = job.value {
        update = update.with_asset(NodeAssetKey::Output, value.into());
      }
      self.apply(update).await?;
      return Ok(());
    }

    self.apply(NodeUpdate::new(node_id, Status::Dispatching)).await?;
    let executor_name = job.executor.name.clone();
    let submitted = match self.dispatcher.executors().resolve(&executor_name) {
      Ok(executor) => executor.submit(job).await,
      Err(err) => Err(err),
    };
    match submitted {
      Ok(()) => {
        self.apply(NodeUpdate::new(node_id, Status::Running)).await?;
        debug!(dispatch_id = %self.dispatch_id, node_id = %node_id, executor = %executor_name, "node_submitted");
        Ok(())
      }
      Err(err) => {
        warn!(dispatch_id = %self.dispatch_id, node_id = %node_id, error = %err, "node_submit_failed");
        self.fail_node(node_id, err.to_string()).await
      }
    }
  }

  /// Copy the result node's output to the dispatch result.
  async fn postprocess(&self) -> Result<(), DispatchError> {
    self
      .result
      .set_dispatch_status(Status::Postprocessing)
      .await
      .map_err(|err| self.lift(err))?;
    self.persist().await?;

    let (result_node, output, empty) = self
      .result
      .with_dispatch(|dispatch| {
        let result_node = dispatch.lattice.result_node();
        let output = result_node
          .and_then(|id| stored(dispatch.asset(AssetLocator::Node(id, NodeAssetKey::Output))));
        (result_node, output, dispatch.graph().is_empty())
      })
      .await;

    let Some(output) = output else {
      if empty {
        return self.finish(Status::Completed).await;
      }
      let message = match result_node {
        Some(id) => format!("result node {id} produced no output"),
        None => "lattice has no result node".to_string(),
      };
      return self.fail_postprocessing(message).await;
    };

    let locator = AssetLocator::Dispatch(DispatchAssetKey::Result);
    match self.dispatcher.copy_asset(&output, &self.dispatch_id, locator).await {
      Ok(result) => {
        self
          .result
          .with_dispatch(|dispatch| dispatch.set_asset(locator, result.into()))
          .await;
        self.finish(Status::Completed).await
      }
      Err(err) => self.fail_postprocessing(format!("cannot store dispatch result: {err}")).await,
    }
  }

  async fn fail_postprocessing(&self, message: String) -> Result<(), DispatchError> {
    self.dispatch_error(message).await?;
    self.finish(Status::PostprocessingFailed).await
  }

  /// Describe the failed nodes in the dispatch error asset.
  async fn record_failure(&self) -> Result<(), DispatchError> {
    let failed: Vec<String> = self
      .result
      .with_dispatch(|dispatch| {
        dispatch
          .graph()
          .nodes()
          .filter(|node| node.status.category() == electra_status::StatusCategory::Failed)
          .map(|node| format!("node {} ({}) {}", node.id, node.name, node.status))
          .collect()
      })
      .await;
    self
      .dispatch_error(format!("dispatch failed: {}", failed.join(", ")))
      .await
  }

  async fn dispatch_error(&self, message: String) -> Result<(), DispatchError> {
    let locator = AssetLocator::Dispatch(DispatchAssetKey::Error);
    let asset = self
      .dispatcher
      .store_bytes(&self.dispatch_id, locator, message)
      .await?;
    self
      .result
      .with_dispatch(|dispatch| dispatch.set_asset(locator, asset.into()))
      .await;
    Ok(())
  }

  /// Move the dispatch to a terminal status and tell the parent, if any.
  async fn finish(&self, status: Status) -> Result<(), DispatchError> {
    self
      .result
      .set_dispatch_status(status)
      .await
      .map_err(|err| self.lift(err))?;
    self.persist().await?;
    info!(dispatch_id = %self.dispatch_id, status = %status, "dispatch_finished");

    if let Some(parent) = self.result.parent() {
      self.dispatcher.notify(
        parent.dispatch_id.clone(),
        StatusMessage::SublatticeFinished {
          node_id: parent.node_id,
          child_id: self.dispatch_id.clone(),
          status,
        },
      );
    }
    Ok(())
  }

  // ---------------------------------------------------------------------------
  // Node updates
  // ---------------------------------------------------------------------------

  async fn apply(&self, update: NodeUpdate) -> Result<Transition, DispatchError> {
    let node_id = update.node_id;
    let transition = self
      .result
      .update_node(update)
      .await
      .map_err(|err| self.lift(err))?;
    if transition == Transition::Applied {
      self.persist_electron(node_id).await;
    }
    Ok(transition)
  }

  async fn fail_node(&self, node_id: NodeId, message: String) -> Result<(), DispatchError> {
    let error = self
      .node_asset(node_id, NodeAssetKey::Error, message.clone())
      .await?;
    self
      .apply(
        NodeUpdate::new(node_id, Status::Failed)
          .with_asset(NodeAssetKey::Error, error)
          .with_detail(message),
      )
      .await?;
    Ok(())
  }

  async fn node_asset(
    &self,
    node_id: NodeId,
    key: NodeAssetKey,
    data: impl Into<bytes::Bytes>,
  ) -> Result<AssetPayload, DispatchError> {
    let asset = self
      .dispatcher
      .store_bytes(&self.dispatch_id, AssetLocator::Node(node_id, key), data)
      .await?;
    Ok(asset.into())
  }

  // ---------------------------------------------------------------------------
  // Persistence
  // ---------------------------------------------------------------------------

  async fn persist(&self) -> Result<(), DispatchError> {
    let manifest = self.result.manifest().await.map_err(|err| self.lift(err))?;
    let store = self.dispatcher.store();
    store.save_manifest(&self.dispatch_id, &manifest).await?;
    store
      .update_dispatch_status(
        &self.dispatch_id,
        manifest.metadata.status,
        manifest.metadata.start_time,
        manifest.metadata.end_time,
      )
      .await?;
    Ok(())
  }

  async fn persist_electron(&self, node_id: NodeId) {
    let record = self
      .result
      .with_dispatch(|dispatch| {
        dispatch
          .graph()
          .get_node(node_id)
          .map(|node| electron_record(dispatch.id(), node))
      })
      .await;
    let Some(record) = record else {
      return;
    };
    if let Err(err) = self.dispatcher.store().upsert_electron(&record).await {
      warn!(dispatch_id = %self.dispatch_id, node_id = %node_id, error = %err, "electron_persist_failed");
    }
  }
}
