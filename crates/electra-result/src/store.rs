use chrono::Utc;
use electra_asset::AssetPayload;
use electra_graph::{NodeAssetKey, NodeId};
use electra_manifest::{Dispatch, ResultManifest};
use electra_status::{Scope, Status, StatusSummary, Transition, check_transition};
use tokio::sync::{Mutex, broadcast, watch};
use tracing::debug;

use crate::{DispatchEvent, ResultError};

/// The node of a parent dispatch that spawned this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
  pub dispatch_id: String,
  pub node_id: NodeId,
}

/// One reported change to a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpdate {
  pub node_id: NodeId,
  pub status: Status,
  pub assets: Vec<(NodeAssetKey, AssetPayload)>,
  pub sub_dispatch_id: Option<String>,
  pub detail: Option<String>,
}

impl NodeUpdate {
  pub fn new(node_id: NodeId, status: Status) -> Self {
    Self {
      node_id,
      status,
      assets: Vec::new(),
      sub_dispatch_id: None,
      detail: None,
    }
  }

  pub fn with_asset(mut self, key: NodeAssetKey, payload: AssetPayload) -> Self {
    self.assets.push((key, payload));
    self
  }

  pub fn with_sub_dispatch(mut self, dispatch_id: impl Into<String>) -> Self {
    self.sub_dispatch_id = Some(dispatch_id.into());
    self
  }

  pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
    self.detail = Some(detail.into());
    self
  }
}

/// Live state of one dispatch.
pub struct ResultStore {
  dispatch_id: String,
  parent: Option<ParentLink>,
  state: Mutex<Dispatch>,
  status: watch::Sender<Status>,
  events: broadcast::Sender<DispatchEvent>,
}

impl ResultStore {
  pub fn new(dispatch: Dispatch, parent: Option<ParentLink>, event_capacity: usize) -> Self {
    let (status, _) = watch::channel(dispatch.status());
    let (events, _) = broadcast::channel(event_capacity.max(1));
    Self {
      dispatch_id: dispatch.id().to_string(),
      parent,
      state: Mutex::new(dispatch),
      status,
      events,
    }
  }

  pub fn dispatch_id(&self) -> &str {
    &self.dispatch_id
  }

  pub fn parent(&self) -> Option<&ParentLink> {
    self.parent.as_ref()
  }

  /// Current dispatch status.
  pub fn status(&self) -> Status {
    *self.status.borrow()
  }

  /// Follow the dispatch status.
  pub fn watch_status(&self) -> watch::Receiver<Status> {
    self.status.subscribe()
  }

  /// Follow node and dispatch status events.
  pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
    self.events.subscribe()
  }

  /// Check whether `status` would be accepted for `node_id` without
  /// applying it.
  pub async fn check_node(&self, node_id: NodeId, status: Status) -> Result<Transition, ResultError> {
    let state = self.state.lock().await;
    let node = state
      .graph()
      .get_node(node_id)
      .ok_or(ResultError::NodeNotFound(node_id))?;
    Ok(check_transition(
      Scope::Node {
        sublattice: node.sublattice,
      },
      node.status,
      status,
    )?)
  }

  /// Apply a node update.
  ///
  /// A repeated status is a no-op: assets carried by the duplicate are
  /// ignored. An illegal transition leaves the node untouched.
  pub async fn update_node(&self, update: NodeUpdate) -> Result<Transition, ResultError> {
    let mut state = self.state.lock().await;
    let node = state
      .graph_mut()
      .get_node_mut(update.node_id)
      .ok_or(ResultError::NodeNotFound(update.node_id))?;

    let transition = check_transition(
      Scope::Node {
        sublattice: node.sublattice,
      },
      node.status,
      update.status,
    )?;
    if transition == Transition::Unchanged {
      return Ok(transition);
    }

    let now = Utc::now();
    node.status = update.status;
    if update.status.is_in_flight() && node.start_time.is_none() {
      node.start_time = Some(now);
    }
    if update.status.is_terminal() {
      node.start_time.get_or_insert(now);
      node.end_time = Some(now);
    }
    for (key, payload) in update.assets {
      node.assets.insert(key, payload);
    }
    if let Some(sub_dispatch_id) = update.sub_dispatch_id {
      node.sub_dispatch_id = Some(sub_dispatch_id);
    }

    debug!(
      dispatch_id = %self.dispatch_id,
      node_id = %update.node_id,
      status = %update.status,
      "node_status_changed"
    );
    let _ = self.events.send(DispatchEvent::NodeStatusChanged {
      dispatch_id: self.dispatch_id.clone(),
      node_id: update.node_id,
      status: update.status,
      detail: update.detail,
    });
    Ok(transition)
  }

  /// Move the dispatch to `status`.
  pub async fn set_dispatch_status(&self, status: Status) -> Result<Transition, ResultError> {
    let mut state = self.state.lock().await;
    let transition = check_transition(Scope::Dispatch, state.metadata.status, status)?;
    if transition == Transition::Unchanged {
      return Ok(transition);
    }

    let now = Utc::now();
    state.metadata.status = status;
    if status.is_in_flight() && state.metadata.start_time.is_none() {
      state.metadata.start_time = Some(now);
    }
    if status.is_terminal() {
      state.metadata.end_time = Some(now);
    }
    drop(state);

    debug!(dispatch_id = %self.dispatch_id, status = %status, "dispatch_status_changed");
    self.status.send_replace(status);
    let _ = self.events.send(DispatchEvent::DispatchStatusChanged {
      dispatch_id: self.dispatch_id.clone(),
      status,
    });
    Ok(transition)
  }

  /// `NEW` nodes whose dependencies all completed.
  pub async fn ready_nodes(&self) -> Vec<NodeId> {
    self.state.lock().await.graph().ready_nodes()
  }

  /// Nodes waiting to take over a previous result.
  pub async fn pending_reuse(&self) -> Vec<NodeId> {
    let state = self.state.lock().await;
    state
      .graph()
      .nodes()
      .filter(|node| node.status == Status::PendingReuse)
      .map(|node| node.id)
      .collect()
  }

  /// Nodes handed to an executor or a child dispatch and not yet terminal.
  pub async fn in_flight(&self) -> Vec<NodeId> {
    let state = self.state.lock().await;
    state
      .graph()
      .nodes()
      .filter(|node| node.status.is_in_flight())
      .map(|node| node.id)
      .collect()
  }

  /// Dispatch status implied by the current node statuses.
  pub async fn derived_status(&self) -> Status {
    let state = self.state.lock().await;
    let graph = state.graph();
    let summary = StatusSummary::from_statuses(graph.nodes().map(|node| node.status));
    let can_progress = !graph.ready_nodes().is_empty()
      || graph.nodes().any(|node| node.status == Status::PendingReuse);
    summary.dispatch_status(can_progress)
  }

  /// Run `f` against the live dispatch under the lock.
  pub async fn with_dispatch<R>(&self, f: impl FnOnce(&mut Dispatch) -> R) -> R {
    let mut state = self.state.lock().await;
    f(&mut state)
  }

  /// Copy of the live dispatch.
  pub async fn snapshot(&self) -> Dispatch {
    self.state.lock().await.clone()
  }

  pub async fn manifest(&self) -> Result<ResultManifest, ResultError> {
    Ok(self.state.lock().await.to_manifest()?)
  }
}

#[cfg(test)]
mod tests {
  use bytes::Bytes;
  use electra_graph::{EdgeAttrs, NodeSpec, TaskGraph};
  use electra_manifest::Lattice;

  use super::*;

  fn store() -> ResultStore {
    let mut graph = TaskGraph::new();
    let a = graph.add_node(NodeSpec::new("task0"));
    let b = graph.add_node(NodeSpec::new("task1"));
    graph.add_node(NodeSpec::new("nested").sublattice());
    graph.add_edge(a, b, EdgeAttrs::positional("x", 0)).unwrap();
    let dispatch = Dispatch::new(Lattice::new("flow", graph)).with_id("d1");
    ResultStore::new(dispatch, None, 16)
  }

  #[tokio::test]
  async fn test_update_sets_timestamps_and_assets() {
    let store = store();
    store
      .update_node(NodeUpdate::new(NodeId(0), Status::Running))
      .await
      .unwrap();
    store
      .update_node(
        NodeUpdate::new(NodeId(0), Status::Completed)
          .with_asset(NodeAssetKey::Output, AssetPayload::Inline(Bytes::from_static(b"1"))),
      )
      .await
      .unwrap();

    let snapshot = store.snapshot().await;
    let node = snapshot.graph().get_node(NodeId(0)).unwrap();
    assert_eq!(node.status, Status::Completed);
    assert!(node.start_time.is_some());
    assert!(node.end_time >= node.start_time);
    assert!(node.asset(NodeAssetKey::Output).is_some());
  }

  #[tokio::test]
  async fn test_repeated_terminal_is_idempotent() {
    let store = store();
    store
      .update_node(NodeUpdate::new(NodeId(0), Status::Running))
      .await
      .unwrap();
    let first = store
      .update_node(NodeUpdate::new(NodeId(0), Status::Failed))
      .await
      .unwrap();
    let second = store
      .update_node(
        NodeUpdate::new(NodeId(0), Status::Failed)
          .with_asset(NodeAssetKey::Error, AssetPayload::Inline(Bytes::from_static(b"late"))),
      )
      .await
      .unwrap();

    assert_eq!(first, Transition::Applied);
    assert_eq!(second, Transition::Unchanged);
    let snapshot = store.snapshot().await;
    let node = snapshot.graph().get_node(NodeId(0)).unwrap();
    assert_eq!(node.status, Status::Failed);
    assert!(node.asset(NodeAssetKey::Error).is_none());
  }

  #[tokio::test]
  async fn test_completed_after_cancelled_is_rejected() {
    let store = store();
    store
      .update_node(NodeUpdate::new(NodeId(1), Status::Cancelled))
      .await
      .unwrap();
    let err = store
      .update_node(NodeUpdate::new(NodeId(1), Status::Completed))
      .await
      .unwrap_err();
    assert!(matches!(err, ResultError::Transition(_)));
    assert_eq!(
      store.snapshot().await.graph().status_of(NodeId(1)),
      Some(Status::Cancelled)
    );
  }

  #[tokio::test]
  async fn test_unknown_node() {
    let store = store();
    assert!(matches!(
      store.update_node(NodeUpdate::new(NodeId(7), Status::Running)).await,
      Err(ResultError::NodeNotFound(NodeId(7)))
    ));
  }

  #[tokio::test]
  async fn test_events_and_watch() {
    let store = store();
    let mut events = store.subscribe();
    let mut status = store.watch_status();

    store
      .update_node(NodeUpdate::new(NodeId(0), Status::Running).with_detail("picked up"))
      .await
      .unwrap();
    store.set_dispatch_status(Status::Running).await.unwrap();

    assert_eq!(
      events.recv().await.unwrap(),
      DispatchEvent::NodeStatusChanged {
        dispatch_id: "d1".to_string(),
        node_id: NodeId(0),
        status: Status::Running,
        detail: Some("picked up".to_string()),
      }
    );
    assert!(matches!(
      events.recv().await.unwrap(),
      DispatchEvent::DispatchStatusChanged { status: Status::Running, .. }
    ));
    status.changed().await.unwrap();
    assert_eq!(*status.borrow(), Status::Running);
  }

  #[tokio::test]
  async fn test_dispatch_transition_is_checked() {
    let store = store();
    assert!(store.set_dispatch_status(Status::Postprocessing).await.is_err());
    assert_eq!(store.status(), Status::New);
  }

  #[tokio::test]
  async fn test_sublattice_node_expands() {
    let store = store();
    store
      .update_node(NodeUpdate::new(NodeId(2), Status::Running))
      .await
      .unwrap();
    store
      .update_node(
        NodeUpdate::new(NodeId(2), Status::DispatchingSublattice).with_sub_dispatch("child"),
      )
      .await
      .unwrap();
    let snapshot = store.snapshot().await;
    let node = snapshot.graph().get_node(NodeId(2)).unwrap();
    assert_eq!(node.sub_dispatch_id.as_deref(), Some("child"));
    assert_eq!(store.in_flight().await, vec![NodeId(2)]);
  }

  #[tokio::test]
  async fn test_derived_status() {
    let store = store();
    assert_eq!(store.ready_nodes().await, vec![NodeId(0), NodeId(2)]);
    assert_eq!(store.derived_status().await, Status::New);

    store
      .update_node(NodeUpdate::new(NodeId(0), Status::Failed))
      .await
      .unwrap();
    store
      .update_node(NodeUpdate::new(NodeId(2), Status::Running))
      .await
      .unwrap();
    assert_eq!(store.derived_status().await, Status::Running);

    store
      .update_node(NodeUpdate::new(NodeId(2), Status::Completed))
      .await
      .unwrap();
    assert_eq!(store.derived_status().await, Status::Failed);
  }
}
