//! Integration tests for the dispatcher against a filesystem asset store,
//! an in-memory sqlite store and a channel executor.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use electra_archive::TransportableObject;
use electra_asset::{collect_bytes, file_uri, sha1_hex, stream_from_bytes};
use electra_dispatcher::{
  ChannelExecutor, DispatchError, Dispatcher, DispatcherConfig, ExecutorRegistry, JobQueue,
  NodeOutcome, RegisterOptions, Representation, TaskJob,
};
use electra_graph::{EdgeAttrs, ExecutorSpec, NodeAssetKey, NodeId, NodeSpec, TaskGraph};
use electra_manifest::{AssetLocator, Dispatch, DispatchAssetKey, Lattice, ResultManifest};
use electra_result::DispatchEvent;
use electra_status::{Status, Transition};
use electra_store::SqliteStore;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
  dispatcher: Dispatcher,
  queue: JobQueue,
  dir: tempfile::TempDir,
}

async fn harness() -> Harness {
  let dir = tempfile::tempdir().expect("failed to create temp dir");
  let store = SqliteStore::in_memory().await.expect("failed to open store");
  let (executor, queue) = ChannelExecutor::new(32);
  let executors = ExecutorRegistry::new("local", Arc::new(executor));
  let config = DispatcherConfig::new(dir.path().join("assets"))
    .with_public_url("http://localhost:48008/")
    .with_import_root(dir.path().join("client"));
  let dispatcher = Dispatcher::open(config, Arc::new(store), executors)
    .await
    .expect("failed to open dispatcher");
  Harness {
    dispatcher,
    queue,
    dir,
  }
}

impl Harness {
  /// Serialize `dispatch` the way a client does before registering it.
  async fn manifest(&self, dispatch: &Dispatch) -> ResultManifest {
    let path = self
      .dir
      .path()
      .join("client")
      .join(&dispatch.lattice.metadata.name);
    electra_manifest::serialize(dispatch, &path)
      .await
      .expect("failed to serialize dispatch")
  }

  async fn next_job(&self) -> TaskJob {
    self.queue.next(WAIT).await.expect("no job was submitted")
  }

  async fn report(&self, job: &TaskJob, outcome: NodeOutcome) -> Transition {
    self
      .dispatcher
      .mark_node_ready(&job.dispatch_id, job.node_id, outcome)
      .await
      .expect("report rejected")
  }

  async fn read(&self, dispatch_id: &str, locator: AssetLocator) -> Bytes {
    let read = self
      .dispatcher
      .read_asset(dispatch_id, locator, None)
      .await
      .expect("asset read failed");
    collect_bytes(read.stream).await.expect("asset stream failed")
  }
}

/// `task0 -> task1`
fn two_tasks(name: &str) -> Dispatch {
  let mut graph = TaskGraph::new();
  let a = graph.add_node(NodeSpec::new("task0").with_function(&b"fn task0"[..]));
  let b = graph.add_node(NodeSpec::new("task1").with_function(&b"fn task1"[..]));
  graph
    .add_edge(a, b, EdgeAttrs::positional("x", 0))
    .expect("failed to add edge");
  Dispatch::new(Lattice::new(name, graph))
}

async fn run_two_tasks(h: &Harness, name: &str) -> String {
  let manifest = h.manifest(&two_tasks(name)).await;
  let dispatch_id = h.dispatcher.submit(manifest).await.expect("submit failed");

  let first = h.next_job().await;
  h.report(&first, NodeOutcome::completed(&b"out0"[..])).await;
  let second = h.next_job().await;
  h.report(&second, NodeOutcome::completed(&b"out1"[..])).await;

  let status = h
    .dispatcher
    .wait(&dispatch_id, Some(WAIT), CancellationToken::new())
    .await
    .expect("wait failed");
  assert_eq!(status, Status::Completed);
  dispatch_id
}

#[tokio::test]
async fn test_two_node_dispatch_completes_with_result() {
  let h = harness().await;
  let manifest = h.manifest(&two_tasks("pipeline")).await;
  let registered = h
    .dispatcher
    .register(manifest, RegisterOptions::import_local())
    .await
    .expect("register failed");
  let dispatch_id = registered.dispatch_id.clone();

  for (locator, asset) in registered.manifest.assets() {
    assert!(asset.uri.is_none(), "{locator} leaked a server path");
    let remote = asset.remote_uri.as_deref().expect("remote uri missing");
    assert_eq!(
      remote,
      format!("http://localhost:48008{}", locator.route(&dispatch_id))
    );
  }

  let mut events = h.dispatcher.subscribe(&dispatch_id).await.expect("subscribe failed");
  h.dispatcher.start(&dispatch_id).await.expect("start failed");

  let first = h.next_job().await;
  assert_eq!(first.node_id, NodeId(0));
  assert_eq!(
    first.function.as_ref().and_then(|asset| asset.digest.clone()),
    Some(sha1_hex(b"fn task0"))
  );
  assert_eq!(h.report(&first, NodeOutcome::completed(&b"out0"[..])).await, Transition::Applied);

  let second = h.next_job().await;
  assert_eq!(second.node_id, NodeId(1));
  assert_eq!(second.arguments.len(), 1);
  assert_eq!(second.arguments[0].source, NodeId(0));
  assert_eq!(
    second.arguments[0].value.as_ref().and_then(|asset| asset.digest.clone()),
    Some(sha1_hex(b"out0"))
  );
  h.report(&second, NodeOutcome::completed(&b"out1"[..])).await;

  let status = h
    .dispatcher
    .wait(&dispatch_id, Some(WAIT), CancellationToken::new())
    .await
    .expect("wait failed");
  assert_eq!(status, Status::Completed);

  let mut dispatch_statuses = Vec::new();
  while let Ok(event) = events.try_recv() {
    if let DispatchEvent::DispatchStatusChanged { status, .. } = event {
      dispatch_statuses.push(status);
    }
  }
  assert_eq!(
    dispatch_statuses,
    vec![Status::Running, Status::Postprocessing, Status::Completed]
  );

  let result = h
    .read(&dispatch_id, AssetLocator::Dispatch(DispatchAssetKey::Result))
    .await;
  assert_eq!(&result[..], b"out1");

  let view = h.dispatcher.status(&dispatch_id).await.expect("status failed");
  assert!(view.nodes.iter().all(|node| node.status == Status::Completed));
  assert!(view.start_time.is_some() && view.end_time.is_some());
}

#[tokio::test]
async fn test_parameter_nodes_complete_without_executor() {
  let h = harness().await;
  let mut graph = TaskGraph::new();
  let param = graph.add_node(NodeSpec::new(":parameter:2").with_value(&b"2"[..]));
  let task = graph.add_node(NodeSpec::new("square").with_function(&b"fn square"[..]));
  graph
    .add_edge(param, task, EdgeAttrs::keyword("n"))
    .expect("failed to add edge");
  let manifest = h.manifest(&Dispatch::new(Lattice::new("params", graph))).await;

  let dispatch_id = h.dispatcher.submit(manifest).await.expect("submit failed");
  let job = h.next_job().await;
  assert_eq!(job.node_id, task);
  assert_eq!(
    job.arguments[0].value.as_ref().and_then(|asset| asset.digest.clone()),
    Some(sha1_hex(b"2"))
  );

  let view = h.dispatcher.status(&dispatch_id).await.expect("status failed");
  assert_eq!(view.nodes[0].status, Status::Completed);
  assert_eq!(view.nodes[1].status, Status::Running);
}

#[tokio::test]
async fn test_unknown_executor_fails_the_node() {
  let h = harness().await;
  let mut graph = TaskGraph::new();
  graph.add_node(
    NodeSpec::new("remote")
      .with_function(&b"fn remote"[..])
      .with_executor(ExecutorSpec::named("gpu")),
  );
  let manifest = h.manifest(&Dispatch::new(Lattice::new("unrouted", graph))).await;
  let dispatch_id = h.dispatcher.submit(manifest).await.expect("submit failed");

  let status = h
    .dispatcher
    .wait(&dispatch_id, Some(WAIT), CancellationToken::new())
    .await
    .expect("wait failed");
  assert_eq!(status, Status::Failed);
  let error = h
    .read(&dispatch_id, AssetLocator::Node(NodeId(0), NodeAssetKey::Error))
    .await;
  assert_eq!(&error[..], b"unknown executor: gpu");
  assert!(h.queue.next(Duration::from_millis(50)).await.is_none());
}

#[tokio::test]
async fn test_terminal_reports_are_idempotent() {
  let h = harness().await;
  let manifest = h.manifest(&two_tasks("flaky")).await;
  let dispatch_id = h.dispatcher.submit(manifest).await.expect("submit failed");
  let job = h.next_job().await;

  let first = h.report(&job, NodeOutcome::failed("boom")).await;
  let second = h.report(&job, NodeOutcome::failed("boom again")).await;
  assert_eq!(first, Transition::Applied);
  assert_eq!(second, Transition::Unchanged);

  let err = h
    .dispatcher
    .mark_node_ready(&dispatch_id, job.node_id, NodeOutcome::completed(&b"late"[..]))
    .await
    .expect_err("completed after failed must be rejected");
  assert!(matches!(err, DispatchError::Transition(_)));

  let status = h
    .dispatcher
    .wait(&dispatch_id, Some(WAIT), CancellationToken::new())
    .await
    .expect("wait failed");
  assert_eq!(status, Status::Failed);

  let node_error = h
    .read(&dispatch_id, AssetLocator::Node(job.node_id, NodeAssetKey::Error))
    .await;
  assert_eq!(&node_error[..], b"boom");
  let dispatch_error = h
    .read(&dispatch_id, AssetLocator::Dispatch(DispatchAssetKey::Error))
    .await;
  assert!(String::from_utf8_lossy(&dispatch_error).contains("task0"));

  let view = h.dispatcher.status(&dispatch_id).await.expect("status failed");
  assert_eq!(view.nodes[1].status, Status::New);
}

#[tokio::test]
async fn test_cancel_marks_open_nodes_cancelled() {
  let h = harness().await;
  let manifest = h.manifest(&two_tasks("cancelled")).await;
  let dispatch_id = h.dispatcher.submit(manifest).await.expect("submit failed");

  h.dispatcher.cancel(&dispatch_id).await.expect("cancel failed");
  let status = h
    .dispatcher
    .wait(&dispatch_id, Some(WAIT), CancellationToken::new())
    .await
    .expect("wait failed");
  assert_eq!(status, Status::Cancelled);

  let view = h.dispatcher.status(&dispatch_id).await.expect("status failed");
  assert!(view.nodes.iter().all(|node| node.status == Status::Cancelled));

  // The queued job was withdrawn from the executor.
  assert!(h.queue.next(Duration::from_millis(50)).await.is_none());

  let err = h
    .dispatcher
    .mark_node_ready(&dispatch_id, NodeId(0), NodeOutcome::completed(&b"late"[..]))
    .await
    .expect_err("completed after cancelled must be rejected");
  assert!(matches!(err, DispatchError::Transition(_)));

  // Cancelling again is a no-op.
  h.dispatcher.cancel(&dispatch_id).await.expect("second cancel failed");
}

#[tokio::test]
async fn test_wait_times_out_and_honours_cancellation() {
  let h = harness().await;
  let manifest = h.manifest(&two_tasks("slow")).await;
  let dispatch_id = h.dispatcher.submit(manifest).await.expect("submit failed");

  let err = h
    .dispatcher
    .wait(&dispatch_id, Some(Duration::from_millis(20)), CancellationToken::new())
    .await
    .expect_err("wait should time out");
  assert!(matches!(err, DispatchError::Timeout));

  let token = CancellationToken::new();
  token.cancel();
  let err = h
    .dispatcher
    .wait(&dispatch_id, None, token)
    .await
    .expect_err("wait should be cancelled");
  assert!(matches!(err, DispatchError::Cancelled));
}

#[tokio::test]
async fn test_sublattice_result_folds_into_parent() {
  let h = harness().await;
  let mut graph = TaskGraph::new();
  graph.add_node(NodeSpec::new("nested").with_function(&b"fn nested"[..]).sublattice());
  let manifest = h.manifest(&Dispatch::new(Lattice::new("outer", graph))).await;
  let parent_id = h.dispatcher.submit(manifest).await.expect("submit failed");

  let mut child_graph = TaskGraph::new();
  child_graph.add_node(NodeSpec::new("inner").with_function(&b"fn inner"[..]));
  let child = h
    .manifest(&Dispatch::new(Lattice::new("inner-flow", child_graph)))
    .await;

  let job = h.next_job().await;
  assert!(job.sublattice);
  h.report(&job, NodeOutcome::new(Status::Completed).with_sublattice(child))
    .await;

  let view = h.dispatcher.status(&parent_id).await.expect("status failed");
  assert_eq!(view.nodes[0].status, Status::DispatchingSublattice);
  let child_id = view.nodes[0]
    .sub_dispatch_id
    .clone()
    .expect("child dispatch not linked");

  let child_job = h.next_job().await;
  assert_eq!(child_job.dispatch_id, child_id);
  let child_view = h.dispatcher.status(&child_id).await.expect("status failed");
  assert_eq!(child_view.root_dispatch_id, parent_id);
  h.report(&child_job, NodeOutcome::completed(&b"inner result"[..]))
    .await;

  let status = h
    .dispatcher
    .wait(&parent_id, Some(WAIT), CancellationToken::new())
    .await
    .expect("wait failed");
  assert_eq!(status, Status::Completed);
  let result = h
    .read(&parent_id, AssetLocator::Dispatch(DispatchAssetKey::Result))
    .await;
  assert_eq!(&result[..], b"inner result");
}

#[tokio::test]
async fn test_malformed_sublattice_fails_the_node() {
  let h = harness().await;
  let mut graph = TaskGraph::new();
  graph.add_node(NodeSpec::new("nested").with_function(&b"fn nested"[..]).sublattice());
  let manifest = h.manifest(&Dispatch::new(Lattice::new("outer", graph))).await;
  let parent_id = h.dispatcher.submit(manifest).await.expect("submit failed");

  let mut child = h.manifest(&two_tasks("broken")).await;
  child.lattice.transport_graph.links[0].target = NodeId(9);

  let job = h.next_job().await;
  h.report(&job, NodeOutcome::new(Status::Completed).with_sublattice(child))
    .await;

  let status = h
    .dispatcher
    .wait(&parent_id, Some(WAIT), CancellationToken::new())
    .await
    .expect("wait failed");
  assert_eq!(status, Status::Failed);
  let error = h
    .read(&parent_id, AssetLocator::Node(NodeId(0), NodeAssetKey::Error))
    .await;
  assert!(String::from_utf8_lossy(&error).starts_with("sublattice expansion failed"));
}

#[tokio::test]
async fn test_redispatch_reuses_unchanged_nodes() {
  let h = harness().await;
  let parent_id = run_two_tasks(&h, "reused").await;

  let updates = BTreeMap::from([("task1".to_string(), Bytes::from_static(b"fn task1 v2"))]);
  let dispatch_id = h
    .dispatcher
    .redispatch(&parent_id, None, updates, true)
    .await
    .expect("redispatch failed");
  assert_ne!(dispatch_id, parent_id);

  let view = h.dispatcher.status(&dispatch_id).await.expect("status failed");
  assert_eq!(view.status, Status::New);
  assert_eq!(view.root_dispatch_id, parent_id);
  assert_eq!(view.nodes[0].status, Status::PendingReuse);
  assert_eq!(view.nodes[1].status, Status::New);

  h.dispatcher.start(&dispatch_id).await.expect("start failed");
  let job = h.next_job().await;
  assert_eq!(job.dispatch_id, dispatch_id);
  assert_eq!(job.node_id, NodeId(1));
  assert_eq!(
    job.function.as_ref().and_then(|asset| asset.digest.clone()),
    Some(sha1_hex(b"fn task1 v2"))
  );
  h.report(&job, NodeOutcome::completed(&b"out1 v2"[..])).await;

  let status = h
    .dispatcher
    .wait(&dispatch_id, Some(WAIT), CancellationToken::new())
    .await
    .expect("wait failed");
  assert_eq!(status, Status::Completed);
  let reused = h
    .read(&dispatch_id, AssetLocator::Node(NodeId(0), NodeAssetKey::Output))
    .await;
  assert_eq!(&reused[..], b"out0");
}

#[tokio::test]
async fn test_redispatch_survives_purging_its_parent() {
  let h = harness().await;
  let parent_id = run_two_tasks(&h, "orphaned").await;

  let updates = BTreeMap::from([("task1".to_string(), Bytes::from_static(b"fn task1 v2"))]);
  let dispatch_id = h
    .dispatcher
    .redispatch(&parent_id, None, updates, true)
    .await
    .expect("redispatch failed");
  h.dispatcher.purge(&parent_id).await.expect("purge failed");

  let function = h
    .read(&dispatch_id, AssetLocator::Node(NodeId(0), NodeAssetKey::Function))
    .await;
  assert_eq!(&function[..], b"fn task0");

  h.dispatcher.start(&dispatch_id).await.expect("start failed");
  let job = h.next_job().await;
  assert_eq!(job.node_id, NodeId(1));
  assert_eq!(job.arguments[0].source, NodeId(0));
  h.report(&job, NodeOutcome::completed(&b"out1 v2"[..])).await;

  let status = h
    .dispatcher
    .wait(&dispatch_id, Some(WAIT), CancellationToken::new())
    .await
    .expect("wait failed");
  assert_eq!(status, Status::Completed);
  let reused = h
    .read(&dispatch_id, AssetLocator::Node(NodeId(0), NodeAssetKey::Output))
    .await;
  assert_eq!(&reused[..], b"out0");
  let result = h
    .read(&dispatch_id, AssetLocator::Dispatch(DispatchAssetKey::Result))
    .await;
  assert_eq!(&result[..], b"out1 v2");
}

#[tokio::test]
async fn test_redispatch_without_reuse_runs_everything() {
  let h = harness().await;
  let parent_id = run_two_tasks(&h, "rerun").await;

  let dispatch_id = h
    .dispatcher
    .redispatch(&parent_id, None, BTreeMap::new(), false)
    .await
    .expect("redispatch failed");
  h.dispatcher.start(&dispatch_id).await.expect("start failed");
  assert_eq!(h.next_job().await.node_id, NodeId(0));

  let err = h
    .dispatcher
    .redispatch(
      &parent_id,
      None,
      BTreeMap::from([("missing".to_string(), Bytes::from_static(b"x"))]),
      false,
    )
    .await
    .expect_err("unknown electron name must be rejected");
  assert!(matches!(err, DispatchError::InvalidRequest(_)));

  let err = h
    .dispatcher
    .redispatch("no-such-dispatch", None, BTreeMap::new(), false)
    .await
    .expect_err("missing parent must be rejected");
  assert!(matches!(err, DispatchError::NotFound(_)));
}

#[tokio::test]
async fn test_registration_rejects_bad_manifests() {
  let h = harness().await;
  let mut manifest = h.manifest(&two_tasks("dup")).await;
  manifest.metadata.dispatch_id = "fixed-id".to_string();
  h.dispatcher
    .register(manifest.clone(), RegisterOptions::import_local())
    .await
    .expect("first registration failed");
  let err = h
    .dispatcher
    .register(manifest, RegisterOptions::import_local())
    .await
    .expect_err("duplicate id must be rejected");
  assert!(matches!(err, DispatchError::AlreadyExists(_)));

  let mut finished = h.manifest(&two_tasks("finished")).await;
  finished.metadata.dispatch_id = "finished-id".to_string();
  finished.lattice.transport_graph.nodes[0].metadata.status = Status::Completed;
  let err = h
    .dispatcher
    .register(finished, RegisterOptions::import_local())
    .await
    .expect_err("non-reset manifest must be rejected");
  assert!(matches!(err, DispatchError::InvalidManifest(_)));
  assert!(matches!(
    h.dispatcher.status("finished-id").await,
    Err(DispatchError::NotFound(_))
  ));

  let mut tampered = h.manifest(&two_tasks("tampered")).await;
  tampered.metadata.dispatch_id = "tampered-id".to_string();
  tampered.lattice.transport_graph.nodes[0]
    .assets
    .get_mut(&NodeAssetKey::Function)
    .expect("function asset missing")
    .digest = Some(sha1_hex(b"something else"));
  let err = h
    .dispatcher
    .register(tampered, RegisterOptions::import_local())
    .await
    .expect_err("digest mismatch must be rejected");
  assert!(matches!(err, DispatchError::Asset(_)));
  assert!(matches!(
    h.dispatcher.status("tampered-id").await,
    Err(DispatchError::NotFound(_))
  ));
}

#[tokio::test]
async fn test_local_imports_stay_below_the_import_root() {
  let h = harness().await;
  let outside = h.dir.path().join("outside");
  std::fs::create_dir_all(&outside).expect("failed to create dir");
  let secret = outside.join("secret");
  std::fs::write(&secret, b"fn task0").expect("failed to write file");

  let mut undigested = h.manifest(&two_tasks("undigested")).await;
  let function = undigested.lattice.transport_graph.nodes[0]
    .assets
    .get_mut(&NodeAssetKey::Function)
    .expect("function asset missing");
  function.uri = Some("file:///etc/passwd".to_string());
  function.digest = None;
  let err = h
    .dispatcher
    .register(undigested, RegisterOptions::import_local())
    .await
    .expect_err("import without a digest must be rejected");
  assert!(matches!(err, DispatchError::InvalidManifest(_)));

  let escapes = [
    file_uri(&secret),
    file_uri(&h.dir.path().join("client").join("..").join("outside").join("secret")),
  ];
  for uri in escapes {
    let mut manifest = h.manifest(&two_tasks("escaped")).await;
    let function = manifest.lattice.transport_graph.nodes[0]
      .assets
      .get_mut(&NodeAssetKey::Function)
      .expect("function asset missing");
    assert_eq!(function.digest.as_deref(), Some(sha1_hex(b"fn task0").as_str()));
    function.uri = Some(uri.clone());
    let err = h
      .dispatcher
      .register(manifest, RegisterOptions::import_local())
      .await
      .expect_err("import outside the root must be rejected");
    assert!(
      matches!(&err, DispatchError::InvalidManifest(message) if message.contains("import root")),
      "{uri}: {err}"
    );
  }
}

#[tokio::test]
async fn test_local_imports_are_refused_without_an_import_root() {
  let dir = tempfile::tempdir().expect("failed to create temp dir");
  let store = SqliteStore::in_memory().await.expect("failed to open store");
  let (executor, _queue) = ChannelExecutor::new(4);
  let dispatcher = Dispatcher::open(
    DispatcherConfig::new(dir.path().join("assets")),
    Arc::new(store),
    ExecutorRegistry::new("local", Arc::new(executor)),
  )
  .await
  .expect("failed to open dispatcher");

  let manifest = electra_manifest::serialize(&two_tasks("rootless"), &dir.path().join("client"))
    .await
    .expect("failed to serialize dispatch");
  let err = dispatcher
    .register(manifest, RegisterOptions::import_local())
    .await
    .expect_err("local import must be refused");
  assert!(matches!(err, DispatchError::InvalidManifest(_)));
}

#[tokio::test]
async fn test_asset_ranges_and_representations() {
  let h = harness().await;
  let manifest = h.manifest(&two_tasks("assets")).await;
  let registered = h
    .dispatcher
    .register(manifest, RegisterOptions::import_local())
    .await
    .expect("register failed");
  let dispatch_id = registered.dispatch_id;

  let object = TransportableObject::new("[1, 2, 3]", Bytes::from_static(b"\x80\x04payload"));
  let encoded = object.serialize().expect("encode failed");
  let locator = AssetLocator::Dispatch(DispatchAssetKey::Inputs);
  let asset = h
    .dispatcher
    .write_asset(
      &dispatch_id,
      locator,
      stream_from_bytes(encoded.clone()),
      Some(sha1_hex(&encoded)),
    )
    .await
    .expect("write failed");
  assert_eq!(asset.size, encoded.len() as u64);

  let read = h
    .dispatcher
    .read_asset(&dispatch_id, locator, Some(2..6))
    .await
    .expect("range read failed");
  assert!(read.is_partial());
  assert_eq!(read.total_size, encoded.len() as u64);
  let slice = collect_bytes(read.stream).await.expect("stream failed");
  assert_eq!(&slice[..], &encoded[2..6]);

  let clamped = h
    .dispatcher
    .read_asset(&dispatch_id, locator, Some(10..u64::MAX))
    .await
    .expect("clamped read failed");
  assert_eq!(clamped.range.end, encoded.len() as u64);

  let err = h
    .dispatcher
    .read_asset(&dispatch_id, locator, Some(encoded.len() as u64..encoded.len() as u64 + 5))
    .await
    .err()
    .expect("range past the end must fail");
  assert!(matches!(err, DispatchError::RangeNotSatisfiable { .. }));

  let string = h
    .dispatcher
    .read_representation(&dispatch_id, locator, Representation::String)
    .await
    .expect("string read failed");
  assert_eq!(&collect_bytes(string.stream).await.expect("stream failed")[..], b"[1, 2, 3]");
  let data = h
    .dispatcher
    .read_representation(&dispatch_id, locator, Representation::Object)
    .await
    .expect("object read failed");
  assert_eq!(
    &collect_bytes(data.stream).await.expect("stream failed")[..],
    b"\x80\x04payload"
  );

  let err = h
    .dispatcher
    .write_asset(
      &dispatch_id,
      AssetLocator::Node(NodeId(0), NodeAssetKey::Function),
      stream_from_bytes(&b"not the registered callable"[..]),
      None,
    )
    .await
    .expect_err("content must match the registered digest");
  assert!(matches!(err, DispatchError::Asset(_)));

  let err = h
    .dispatcher
    .read_asset(&dispatch_id, AssetLocator::Dispatch(DispatchAssetKey::Result), None)
    .await
    .err()
    .expect("missing asset must fail");
  assert!(matches!(err, DispatchError::AssetNotFound(_)));
}

#[tokio::test]
async fn test_purge_removes_finished_dispatch() {
  let h = harness().await;
  let dispatch_id = run_two_tasks(&h, "purged").await;
  h.dispatcher.purge(&dispatch_id).await.expect("purge failed");
  assert!(matches!(
    h.dispatcher.status(&dispatch_id).await,
    Err(DispatchError::NotFound(_))
  ));
}

#[tokio::test]
async fn test_purge_removes_sublattice_children() {
  let h = harness().await;
  let mut graph = TaskGraph::new();
  graph.add_node(NodeSpec::new("nested").with_function(&b"fn nested"[..]).sublattice());
  let manifest = h.manifest(&Dispatch::new(Lattice::new("outer-purged", graph))).await;
  let parent_id = h.dispatcher.submit(manifest).await.expect("submit failed");

  let mut child_graph = TaskGraph::new();
  child_graph.add_node(NodeSpec::new("inner").with_function(&b"fn inner"[..]));
  let child = h
    .manifest(&Dispatch::new(Lattice::new("inner-purged", child_graph)))
    .await;
  let job = h.next_job().await;
  h.report(&job, NodeOutcome::new(Status::Completed).with_sublattice(child))
    .await;
  let child_job = h.next_job().await;
  let child_id = child_job.dispatch_id.clone();
  assert_ne!(child_id, parent_id);
  h.report(&child_job, NodeOutcome::completed(&b"inner result"[..]))
    .await;
  let status = h
    .dispatcher
    .wait(&parent_id, Some(WAIT), CancellationToken::new())
    .await
    .expect("wait failed");
  assert_eq!(status, Status::Completed);

  h.dispatcher.purge(&parent_id).await.expect("purge failed");
  for dispatch_id in [&parent_id, &child_id] {
    assert!(matches!(
      h.dispatcher.status(dispatch_id).await,
      Err(DispatchError::NotFound(_))
    ));
  }
}

#[tokio::test]
async fn test_status_of_unloaded_dispatch_reads_electron_records() {
  let dir = tempfile::tempdir().expect("failed to create temp dir");
  let store = Arc::new(SqliteStore::in_memory().await.expect("failed to open store"));
  let config = DispatcherConfig::new(dir.path().join("assets"))
    .with_import_root(dir.path().join("client"));

  let (executor, queue) = ChannelExecutor::new(8);
  let dispatcher = Dispatcher::open(
    config.clone(),
    store.clone(),
    ExecutorRegistry::new("local", Arc::new(executor)),
  )
  .await
  .expect("failed to open dispatcher");
  let manifest = electra_manifest::serialize(&two_tasks("reloaded"), &dir.path().join("client"))
    .await
    .expect("failed to serialize dispatch");
  let dispatch_id = dispatcher.submit(manifest).await.expect("submit failed");
  let job = queue.next(WAIT).await.expect("no job was submitted");
  dispatcher
    .mark_node_ready(&dispatch_id, job.node_id, NodeOutcome::completed(&b"out0"[..]))
    .await
    .expect("report rejected");
  dispatcher.shutdown();

  let (executor, _queue) = ChannelExecutor::new(8);
  let reopened = Dispatcher::open(
    config,
    store,
    ExecutorRegistry::new("local", Arc::new(executor)),
  )
  .await
  .expect("failed to reopen dispatcher");
  let view = reopened.status(&dispatch_id).await.expect("status failed");
  assert_eq!(view.status, Status::Running);
  assert_eq!(view.nodes[0].status, Status::Completed);
  assert!(view.nodes[0].end_time.is_some());
}
