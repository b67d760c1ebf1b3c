use chrono::Utc;
use electra_graph::{NodeId, NodeSpec, TaskGraph};
use electra_manifest::{Dispatch, Lattice, ResultManifest};
use electra_status::Status;
use electra_store::{DispatchRecord, ElectronRecord, SqliteStore, Store, StoreError};

fn manifest(dispatch_id: &str, root: &str) -> ResultManifest {
  let mut graph = TaskGraph::new();
  graph.add_node(NodeSpec::new("task0"));
  graph.add_node(NodeSpec::new("task1"));
  let mut dispatch = Dispatch::new(Lattice::new("flow", graph)).with_id(dispatch_id);
  dispatch.metadata.root_dispatch_id = root.to_string();
  dispatch.to_manifest().unwrap()
}

#[tokio::test]
async fn test_dispatch_round_trip() {
  let store = SqliteStore::in_memory().await.unwrap();
  let record = DispatchRecord::new(&manifest("d1", "d1"), None);
  store.create_dispatch(&record).await.unwrap();

  let loaded = store.get_dispatch("d1").await.unwrap();
  assert_eq!(loaded.root_dispatch_id, "d1");
  assert_eq!(loaded.status().unwrap(), Status::New);
  assert_eq!(loaded.manifest.0, record.manifest.0);
}

#[tokio::test]
async fn test_missing_dispatch_is_not_found() {
  let store = SqliteStore::in_memory().await.unwrap();
  assert!(matches!(
    store.get_dispatch("nope").await,
    Err(StoreError::NotFound(id)) if id == "nope"
  ));
  assert!(matches!(
    store
      .update_dispatch_status("nope", Status::Running, None, None)
      .await,
    Err(StoreError::NotFound(_))
  ));
}

#[tokio::test]
async fn test_status_and_manifest_updates() {
  let store = SqliteStore::in_memory().await.unwrap();
  store
    .create_dispatch(&DispatchRecord::new(&manifest("d1", "d1"), None))
    .await
    .unwrap();

  let started = Utc::now();
  store
    .update_dispatch_status("d1", Status::Running, Some(started), None)
    .await
    .unwrap();
  store
    .update_dispatch_status("d1", Status::Completed, None, Some(Utc::now()))
    .await
    .unwrap();

  let loaded = store.get_dispatch("d1").await.unwrap();
  assert_eq!(loaded.status().unwrap(), Status::Completed);
  assert!(loaded.started_at.is_some());
  assert!(loaded.completed_at.is_some());

  let mut snapshot = manifest("d1", "d1");
  snapshot.metadata.status = Status::Failed;
  store.save_manifest("d1", &snapshot).await.unwrap();
  let loaded = store.get_dispatch("d1").await.unwrap();
  assert_eq!(loaded.manifest.0.metadata.status, Status::Failed);
  assert_eq!(loaded.status().unwrap(), Status::Failed);
}

#[tokio::test]
async fn test_children_are_linked_to_parent() {
  let store = SqliteStore::in_memory().await.unwrap();
  store
    .create_dispatch(&DispatchRecord::new(&manifest("parent", "parent"), None))
    .await
    .unwrap();
  store
    .create_dispatch(&DispatchRecord::new(
      &manifest("child", "parent"),
      Some(("parent", NodeId(1))),
    ))
    .await
    .unwrap();

  let children = store.list_children("parent").await.unwrap();
  assert_eq!(children.len(), 1);
  assert_eq!(children[0].dispatch_id, "child");
  assert_eq!(children[0].root_dispatch_id, "parent");
  assert_eq!(children[0].parent_node_id, Some(1));
  assert!(store.list_children("child").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_electron_upsert() {
  let store = SqliteStore::in_memory().await.unwrap();
  store
    .create_dispatch(&DispatchRecord::new(&manifest("d1", "d1"), None))
    .await
    .unwrap();

  let mut electron = ElectronRecord {
    dispatch_id: "d1".to_string(),
    node_id: 1,
    name: "task1".to_string(),
    status: Status::Running.as_str().to_string(),
    sub_dispatch_id: None,
    started_at: Some(Utc::now()),
    completed_at: None,
  };
  store.upsert_electron(&electron).await.unwrap();
  electron.status = Status::Completed.as_str().to_string();
  electron.completed_at = Some(Utc::now());
  store.upsert_electron(&electron).await.unwrap();

  let electrons = store.list_electrons("d1").await.unwrap();
  assert_eq!(electrons.len(), 1);
  assert_eq!(electrons[0].status().unwrap(), Status::Completed);
  assert!(electrons[0].completed_at.is_some());

  store.delete_dispatch("d1").await.unwrap();
  assert!(store.list_electrons("d1").await.unwrap().is_empty());
  assert!(store.get_dispatch("d1").await.is_err());
}
