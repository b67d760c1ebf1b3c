//! The dispatch orchestrator.
//!
//! A [`Dispatcher`] owns the registry of live dispatches. Each live dispatch
//! has a [`ResultStore`] and a worker task that applies every status change
//! for that dispatch in arrival order. Entry points enqueue a message on the
//! dispatch's bounded queue and wait for the worker's reply.

use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use electra_archive::{Offsets, PREFIX_LEN};
use electra_asset::{
  Asset, AssetError, AssetPayload, AssetStore, ByteStream, DIGEST_ALGORITHM, FsAssetStore,
  PutOptions, StoredObject, collect_bytes, local_path, stream_from_bytes,
};
use electra_graph::NodeId;
use electra_manifest::wire::DispatchStatusView;
use electra_manifest::{AssetLocator, ResultManifest, SCHEMA_VERSION};
use electra_result::{DispatchEvent, ParentLink, ResultStore};
use electra_status::{Status, Transition};
use electra_store::{DispatchRecord, Store};
use futures::StreamExt;
use futures::future::BoxFuture;
use tokio::sync::{RwLock, broadcast, mpsc, oneshot};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::worker::{self, StatusMessage};
use crate::{
  AssetRead, DispatchError, DispatcherConfig, ExecutorRegistry, NodeOutcome, RegisterOptions,
  RegisteredDispatch, Representation,
};

pub(crate) struct DispatchHandle {
  pub(crate) result: Arc<ResultStore>,
  pub(crate) updates: mpsc::Sender<StatusMessage>,
}

struct Inner {
  config: DispatcherConfig,
  assets: Arc<dyn AssetStore>,
  store: Arc<dyn Store>,
  executors: ExecutorRegistry,
  live: RwLock<HashMap<String, Arc<DispatchHandle>>>,
  shutdown: CancellationToken,
}

/// Registry and entry points for all dispatches of one process.
#[derive(Clone)]
pub struct Dispatcher {
  inner: Arc<Inner>,
}

impl Dispatcher {
  pub fn new(
    config: DispatcherConfig,
    assets: Arc<dyn AssetStore>,
    store: Arc<dyn Store>,
    executors: ExecutorRegistry,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        config,
        assets,
        store,
        executors,
        live: RwLock::new(HashMap::new()),
        shutdown: CancellationToken::new(),
      }),
    }
  }

  /// Create a dispatcher backed by a filesystem asset store at
  /// `config.asset_root`.
  pub async fn open(
    config: DispatcherConfig,
    store: Arc<dyn Store>,
    executors: ExecutorRegistry,
  ) -> Result<Self, DispatchError> {
    let assets = FsAssetStore::open(&config.asset_root).await?;
    Ok(Self::new(config, Arc::new(assets), store, executors))
  }

  /// Stop every dispatch worker.
  pub fn shutdown(&self) {
    self.inner.shutdown.cancel();
  }

  pub fn config(&self) -> &DispatcherConfig {
    &self.inner.config
  }

  pub(crate) fn assets(&self) -> &Arc<dyn AssetStore> {
    &self.inner.assets
  }

  pub(crate) fn store(&self) -> &Arc<dyn Store> {
    &self.inner.store
  }

  pub(crate) fn executors(&self) -> &ExecutorRegistry {
    &self.inner.executors
  }

  // ---------------------------------------------------------------------------
  // Registration
  // ---------------------------------------------------------------------------

  /// Register a manifest as a new dispatch.
  ///
  /// Nothing is persisted unless the whole registration succeeds.
  #[instrument(skip(self, manifest), fields(dispatch_id = %manifest.metadata.dispatch_id))]
  pub async fn register(
    &self,
    manifest: ResultManifest,
    options: RegisterOptions,
  ) -> Result<RegisteredDispatch, DispatchError> {
    self.register_internal(manifest, options, None).await
  }

  /// Register a manifest whose assets are readable `file://` paths and
  /// start it.
  pub async fn submit(&self, manifest: ResultManifest) -> Result<String, DispatchError> {
    let registered = self
      .register(manifest, RegisterOptions::import_local())
      .await?;
    self.start(&registered.dispatch_id).await?;
    Ok(registered.dispatch_id)
  }

  pub(crate) async fn register_internal(
    &self,
    mut manifest: ResultManifest,
    options: RegisterOptions,
    parent: Option<ParentLink>,
  ) -> Result<RegisteredDispatch, DispatchError> {
    validate(&manifest)?;

    if manifest.metadata.dispatch_id.is_empty() {
      manifest.metadata.dispatch_id = uuid::Uuid::new_v4().to_string();
    }
    let dispatch_id = manifest.metadata.dispatch_id.clone();
    if self.is_known(&dispatch_id).await? {
      return Err(DispatchError::AlreadyExists(dispatch_id));
    }
    if manifest.metadata.root_dispatch_id.is_empty() {
      manifest.metadata.root_dispatch_id = dispatch_id.clone();
    }
    manifest.metadata.status = Status::New;
    manifest.metadata.start_time = None;
    manifest.metadata.end_time = None;

    let mut imported = Vec::new();
    if let Err(err) = self
      .assign_assets(&dispatch_id, &mut manifest, options, &mut imported)
      .await
    {
      self.discard(&dispatch_id, &imported).await;
      return Err(err);
    }

    let persisted = async {
      let dispatch = electra_manifest::deserialize(manifest.clone())?;
      let record = DispatchRecord::new(
        &manifest,
        parent
          .as_ref()
          .map(|link| (link.dispatch_id.as_str(), link.node_id)),
      );
      self.inner.store.create_dispatch(&record).await?;
      for node in dispatch.graph().nodes() {
        let record = worker::electron_record(&dispatch_id, node);
        if let Err(err) = self.inner.store.upsert_electron(&record).await {
          if let Err(cleanup) = self.inner.store.delete_dispatch(&dispatch_id).await {
            warn!(dispatch_id = %dispatch_id, error = %cleanup, "dispatch_record_cleanup_failed");
          }
          return Err(err.into());
        }
      }
      Ok::<_, DispatchError>(dispatch)
    }
    .await;
    let dispatch = match persisted {
      Ok(dispatch) => dispatch,
      Err(err) => {
        self.discard(&dispatch_id, &imported).await;
        return Err(err);
      }
    };

    let (updates, receiver) = mpsc::channel(self.inner.config.status_queue_capacity.max(1));
    let result = Arc::new(ResultStore::new(
      dispatch,
      parent,
      self.inner.config.event_capacity,
    ));
    self.inner.live.write().await.insert(
      dispatch_id.clone(),
      Arc::new(DispatchHandle {
        result: result.clone(),
        updates,
      }),
    );
    self.spawn_worker(result, receiver);

    info!(
      dispatch_id = %dispatch_id,
      root_dispatch_id = %manifest.metadata.root_dispatch_id,
      nodes = manifest.lattice.transport_graph.nodes.len(),
      imported = imported.len(),
      "dispatch_registered"
    );
    Ok(RegisteredDispatch {
      dispatch_id,
      manifest: hide_locations(manifest),
    })
  }

  fn spawn_worker(&self, result: Arc<ResultStore>, receiver: mpsc::Receiver<StatusMessage>) {
    let worker: BoxFuture<'static, ()> = Box::pin(worker::run(
      self.clone(),
      result,
      receiver,
      self.inner.shutdown.clone(),
    ));
    tokio::spawn(worker);
  }

  async fn is_known(&self, dispatch_id: &str) -> Result<bool, DispatchError> {
    if self.inner.live.read().await.contains_key(dispatch_id) {
      return Ok(true);
    }
    match self.inner.store.get_dispatch(dispatch_id).await {
      Ok(_) => Ok(true),
      Err(electra_store::StoreError::NotFound(_)) => Ok(false),
      Err(err) => Err(err.into()),
    }
  }

  /// Point every asset at its storage location and fill in `remote_uri`.
  ///
  /// With `keep_stored`, assets already in the store are kept, and those in
  /// another dispatch's bucket are copied so the new dispatch owns its bytes.
  async fn assign_assets(
    &self,
    dispatch_id: &str,
    manifest: &mut ResultManifest,
    options: RegisterOptions,
    imported: &mut Vec<String>,
  ) -> Result<(), DispatchError> {
    for (locator, asset) in manifest.assets_mut() {
      let object_name = locator.object_name();
      let located = asset
        .uri
        .as_deref()
        .filter(|_| options.keep_stored)
        .and_then(|uri| self.inner.assets.locate(uri));

      let mut stored = false;
      if let Some((bucket, _)) = located {
        if bucket == dispatch_id {
          stored = true;
        } else {
          match self.copy_asset(asset, dispatch_id, locator).await {
            Ok(copy) => {
              imported.push(object_name.clone());
              *asset = copy;
              stored = true;
            }
            Err(DispatchError::Asset(AssetError::NotFound { .. })) => {
              debug!(dispatch_id = %dispatch_id, locator = %locator, "stored_asset_missing");
              asset.uri = None;
            }
            Err(err) => return Err(err),
          }
        }
      }

      if !stored {
        let source = asset
          .uri
          .as_deref()
          .filter(|_| options.import_local)
          .and_then(local_path);
        match source {
          Some(path) => {
            let object = self
              .import_file(dispatch_id, &object_name, &path, asset)
              .await?;
            imported.push(object.object_name.clone());
            *asset = self.descriptor(dispatch_id, locator, &object);
          }
          None => {
            asset.uri = Some(self.inner.assets.uri(dispatch_id, &object_name));
          }
        }
      }
      asset.remote_uri = Some(self.remote_uri(dispatch_id, locator));
    }
    Ok(())
  }

  /// Copy a client-side `file://` asset into the dispatch bucket.
  ///
  /// Only files below the configured import root are read, and the bytes
  /// must match the digest and size the manifest declares.
  async fn import_file(
    &self,
    dispatch_id: &str,
    object_name: &str,
    path: &Path,
    expected: &Asset,
  ) -> Result<StoredObject, DispatchError> {
    let Some(digest) = expected.digest.clone() else {
      return Err(DispatchError::InvalidManifest(format!(
        "local asset {} has no digest",
        path.display()
      )));
    };
    let path = self.confine_import(path).await?;
    let file = tokio::fs::File::open(&path).await.map_err(|err| {
      DispatchError::InvalidManifest(format!("cannot read {}: {err}", path.display()))
    })?;
    let stream: ByteStream = Box::pin(ReaderStream::new(file).map(|chunk| chunk.map_err(AssetError::Io)));
    let options = PutOptions {
      length: Some(expected.size),
      overwrite: true,
      expected_digest: Some(digest),
    };
    Ok(
      self
        .inner
        .assets
        .put(stream, dispatch_id, object_name, options)
        .await?,
    )
  }

  /// Resolve `path` and require it to sit below the import root.
  async fn confine_import(&self, path: &Path) -> Result<PathBuf, DispatchError> {
    let outside = || {
      DispatchError::InvalidManifest(format!(
        "local asset {} is not readable below the import root",
        path.display()
      ))
    };
    let root = self.inner.config.import_root.as_deref().ok_or_else(outside)?;
    let root = tokio::fs::canonicalize(root).await.map_err(|_| outside())?;
    let resolved = tokio::fs::canonicalize(path).await.map_err(|_| outside())?;
    if !resolved.starts_with(&root) {
      warn!(path = %path.display(), "local_import_refused");
      return Err(outside());
    }
    Ok(resolved)
  }

  pub(crate) async fn discard(&self, bucket: &str, object_names: &[String]) {
    if object_names.is_empty() {
      return;
    }
    let outcome = self.inner.assets.delete(bucket, object_names).await;
    if !outcome.failed.is_empty() {
      warn!(bucket = %bucket, failed = ?outcome.failed, "asset_cleanup_incomplete");
    }
  }

  // ---------------------------------------------------------------------------
  // Lifecycle
  // ---------------------------------------------------------------------------

  /// Begin execution of a registered dispatch.
  #[instrument(skip(self))]
  pub async fn start(&self, dispatch_id: &str) -> Result<(), DispatchError> {
    self
      .request(dispatch_id, |reply| StatusMessage::Start { reply })
      .await
  }

  /// Record an executor's report for one node.
  ///
  /// This is the only way node outcomes enter a dispatch. A repeated report
  /// of the node's current status is accepted as a no-op.
  #[instrument(skip(self, outcome), fields(status = %outcome.status))]
  pub async fn mark_node_ready(
    &self,
    dispatch_id: &str,
    node_id: NodeId,
    outcome: NodeOutcome,
  ) -> Result<Transition, DispatchError> {
    self
      .request(dispatch_id, |reply| StatusMessage::NodeReport {
        node_id,
        outcome,
        reply,
      })
      .await
  }

  /// Cancel a dispatch and every sublattice it has in flight.
  #[instrument(skip(self))]
  pub async fn cancel(&self, dispatch_id: &str) -> Result<(), DispatchError> {
    if self.live(dispatch_id).await.is_none() {
      self
        .inner
        .store
        .get_dispatch(dispatch_id)
        .await
        .map_err(DispatchError::from_store)?;
      return Ok(());
    }
    self
      .request(dispatch_id, |reply| StatusMessage::Cancel { reply })
      .await
  }

  /// Wait until the dispatch reaches a terminal status.
  pub async fn wait(
    &self,
    dispatch_id: &str,
    timeout: Option<Duration>,
    cancel: CancellationToken,
  ) -> Result<Status, DispatchError> {
    let Some(handle) = self.live(dispatch_id).await else {
      let record = self
        .inner
        .store
        .get_dispatch(dispatch_id)
        .await
        .map_err(DispatchError::from_store)?;
      return Ok(record.status()?);
    };

    let mut status = handle.result.watch_status();
    let terminal = async move {
      loop {
        let current = *status.borrow_and_update();
        if current.is_terminal() {
          return Ok(current);
        }
        if status.changed().await.is_err() {
          return Err(DispatchError::WorkerStopped(handle.result.dispatch_id().to_string()));
        }
      }
    };
    let bounded = async move {
      match timeout {
        Some(limit) => match tokio::time::timeout(limit, terminal).await {
          Ok(result) => result,
          Err(_) => Err(DispatchError::Timeout),
        },
        None => terminal.await,
      }
    };

    tokio::select! {
      biased;
      _ = cancel.cancelled() => Err(DispatchError::Cancelled),
      result = bounded => result,
    }
  }

  /// Remove a finished dispatch, its stored objects and its records.
  ///
  /// Sublattice dispatches spawned by its nodes are removed first.
  #[instrument(skip(self))]
  pub async fn purge(&self, dispatch_id: &str) -> Result<(), DispatchError> {
    self.purge_tree(dispatch_id).await
  }

  fn purge_tree<'a>(&'a self, dispatch_id: &'a str) -> BoxFuture<'a, Result<(), DispatchError>> {
    Box::pin(async move {
      let manifest = self.load_manifest(dispatch_id).await?;
      if !manifest.metadata.status.is_terminal() && manifest.metadata.status != Status::New {
        return Err(DispatchError::InvalidRequest(format!(
          "dispatch {dispatch_id} is {}",
          manifest.metadata.status
        )));
      }

      for child in self.inner.store.list_children(dispatch_id).await? {
        self.purge_tree(&child.dispatch_id).await?;
      }

      self.inner.live.write().await.remove(dispatch_id);
      let owned: Vec<String> = manifest
        .assets()
        .into_iter()
        .filter_map(|(_, asset)| asset.uri.as_deref().and_then(|uri| self.inner.assets.locate(uri)))
        .filter(|(bucket, _)| bucket == dispatch_id)
        .map(|(_, object)| object)
        .collect();
      self.discard(dispatch_id, &owned).await;
      self.inner.store.delete_dispatch(dispatch_id).await?;
      info!(dispatch_id = %dispatch_id, objects = owned.len(), "dispatch_purged");
      Ok(())
    })
  }

  // ---------------------------------------------------------------------------
  // Queries
  // ---------------------------------------------------------------------------

  /// Dispatch and node statuses.
  ///
  /// A dispatch that is not live is read from its last manifest snapshot,
  /// with node statuses taken from the electron records written after it.
  pub async fn status(&self, dispatch_id: &str) -> Result<DispatchStatusView, DispatchError> {
    if self.live(dispatch_id).await.is_some() {
      let manifest = self.load_manifest(dispatch_id).await?;
      return Ok(DispatchStatusView::from_manifest(&manifest));
    }
    let record = self
      .inner
      .store
      .get_dispatch(dispatch_id)
      .await
      .map_err(DispatchError::from_store)?;
    let mut view = DispatchStatusView::from_manifest(&record.manifest.0);
    for electron in self.inner.store.list_electrons(dispatch_id).await? {
      let Some(node) = view
        .nodes
        .iter_mut()
        .find(|node| node.id.0 as i64 == electron.node_id)
      else {
        continue;
      };
      node.status = electron.status()?;
      node.sub_dispatch_id = electron.sub_dispatch_id;
      node.start_time = electron.started_at;
      node.end_time = electron.completed_at;
    }
    Ok(view)
  }

  /// Current manifest with server locations removed.
  pub async fn manifest(&self, dispatch_id: &str) -> Result<ResultManifest, DispatchError> {
    Ok(hide_locations(self.load_manifest(dispatch_id).await?))
  }

  /// Follow status events of a live dispatch.
  pub async fn subscribe(
    &self,
    dispatch_id: &str,
  ) -> Result<broadcast::Receiver<DispatchEvent>, DispatchError> {
    Ok(self.handle(dispatch_id).await?.result.subscribe())
  }

  /// Latest manifest of a dispatch, live or persisted.
  pub(crate) async fn load_manifest(&self, dispatch_id: &str) -> Result<ResultManifest, DispatchError> {
    if let Some(handle) = self.live(dispatch_id).await {
      return handle
        .result
        .manifest()
        .await
        .map_err(|err| DispatchError::from_result(dispatch_id, err));
    }
    let record = self
      .inner
      .store
      .get_dispatch(dispatch_id)
      .await
      .map_err(DispatchError::from_store)?;
    Ok(record.manifest.0)
  }

  // ---------------------------------------------------------------------------
  // Assets
  // ---------------------------------------------------------------------------

  /// Store uploaded bytes for an asset slot of a live dispatch.
  ///
  /// The content is checked against `digest` when given, otherwise against
  /// the digest recorded at registration.
  #[instrument(skip(self, data, digest), fields(asset = %locator))]
  pub async fn write_asset(
    &self,
    dispatch_id: &str,
    locator: AssetLocator,
    data: ByteStream,
    digest: Option<String>,
  ) -> Result<Asset, DispatchError> {
    let handle = self.handle(dispatch_id).await?;
    let (slot_exists, registered) = handle
      .result
      .with_dispatch(|dispatch| {
        let exists = match locator {
          AssetLocator::Node(node_id, _) => dispatch.graph().get_node(node_id).is_some(),
          _ => true,
        };
        let registered = dispatch
          .asset(locator)
          .and_then(AssetPayload::as_asset)
          .and_then(|asset| asset.digest.clone());
        (exists, registered)
      })
      .await;
    if let (false, AssetLocator::Node(node_id, _)) = (slot_exists, locator) {
      return Err(DispatchError::NodeNotFound {
        dispatch_id: dispatch_id.to_string(),
        node_id,
      });
    }

    let options = PutOptions {
      length: None,
      overwrite: true,
      expected_digest: digest.or(registered),
    };
    let object = self
      .inner
      .assets
      .put(data, dispatch_id, &locator.object_name(), options)
      .await?;
    let asset = self.descriptor(dispatch_id, locator, &object);
    handle
      .result
      .with_dispatch(|dispatch| dispatch.set_asset(locator, AssetPayload::Stored(asset.clone())))
      .await;

    debug!(dispatch_id = %dispatch_id, asset = %locator, size = asset.size, "asset_written");
    Ok(asset)
  }

  /// Read an asset, or the `[start, end)` slice of it.
  ///
  /// `end` is clamped to the object size; a start at or beyond the end of a
  /// non-empty request is unsatisfiable.
  pub async fn read_asset(
    &self,
    dispatch_id: &str,
    locator: AssetLocator,
    range: Option<Range<u64>>,
  ) -> Result<AssetRead, DispatchError> {
    let (bucket, object_name) = self.resolve_asset(dispatch_id, locator).await?;
    let total_size = match self.inner.assets.size(&bucket, &object_name).await {
      Ok(size) => size,
      Err(AssetError::NotFound { .. }) => {
        return Err(DispatchError::AssetNotFound(locator.to_string()));
      }
      Err(err) => return Err(err.into()),
    };

    let Some(range) = range else {
      let stream = self.inner.assets.get(&bucket, &object_name).await?;
      return Ok(AssetRead {
        stream,
        total_size,
        range: 0..total_size,
      });
    };
    if range.start >= total_size {
      return Err(DispatchError::RangeNotSatisfiable { size: total_size });
    }
    let range = range.start..range.end.min(total_size);
    let stream = self
      .inner
      .assets
      .get_range(&bucket, &object_name, range.clone())
      .await?;
    Ok(AssetRead {
      stream,
      total_size,
      range,
    })
  }

  /// Read the string or payload section of an archive-encoded asset without
  /// reading the rest of it.
  pub async fn read_representation(
    &self,
    dispatch_id: &str,
    locator: AssetLocator,
    representation: Representation,
  ) -> Result<AssetRead, DispatchError> {
    let head = self
      .read_asset(dispatch_id, locator, Some(0..PREFIX_LEN as u64))
      .await?;
    let total_size = head.total_size;
    let offsets = Offsets::read(&collect_bytes(head.stream).await?)?;
    let range = match representation {
      Representation::String => offsets.string_offset..offsets.data_offset,
      Representation::Object => offsets.data_offset..total_size,
    };

    if range.end > total_size {
      return Err(
        electra_archive::ArchiveError::Truncated {
          needed: range.end,
          available: total_size,
        }
        .into(),
      );
    }
    if range.is_empty() {
      return Ok(AssetRead {
        stream: stream_from_bytes(Bytes::new()),
        total_size,
        range,
      });
    }
    self.read_asset(dispatch_id, locator, Some(range)).await
  }

  async fn resolve_asset(
    &self,
    dispatch_id: &str,
    locator: AssetLocator,
  ) -> Result<(String, String), DispatchError> {
    let asset = match self.live(dispatch_id).await {
      Some(handle) => {
        handle
          .result
          .with_dispatch(|dispatch| {
            dispatch
              .asset(locator)
              .and_then(AssetPayload::as_asset)
              .cloned()
          })
          .await
      }
      None => self.load_manifest(dispatch_id).await?.asset(locator).cloned(),
    };

    asset
      .and_then(|asset| asset.uri)
      .and_then(|uri| self.inner.assets.locate(&uri))
      .ok_or_else(|| DispatchError::AssetNotFound(locator.to_string()))
  }

  /// Write `data` to the dispatch's slot for `locator`.
  pub(crate) async fn store_bytes(
    &self,
    dispatch_id: &str,
    locator: AssetLocator,
    data: impl Into<Bytes>,
  ) -> Result<Asset, DispatchError> {
    let object = self
      .inner
      .assets
      .put(
        stream_from_bytes(data),
        dispatch_id,
        &locator.object_name(),
        PutOptions::overwrite(),
      )
      .await?;
    Ok(self.descriptor(dispatch_id, locator, &object))
  }

  /// Copy an existing asset into the dispatch's slot for `locator`.
  pub(crate) async fn copy_asset(
    &self,
    source: &Asset,
    dispatch_id: &str,
    locator: AssetLocator,
  ) -> Result<Asset, DispatchError> {
    let (bucket, object_name) = source
      .uri
      .as_deref()
      .and_then(|uri| self.inner.assets.locate(uri))
      .ok_or_else(|| DispatchError::AssetNotFound(locator.to_string()))?;
    let stream = self.inner.assets.get(&bucket, &object_name).await?;
    let options = PutOptions {
      length: Some(source.size),
      overwrite: true,
      expected_digest: source.digest.clone(),
    };
    let object = self
      .inner
      .assets
      .put(stream, dispatch_id, &locator.object_name(), options)
      .await?;
    Ok(self.descriptor(dispatch_id, locator, &object))
  }

  fn descriptor(&self, dispatch_id: &str, locator: AssetLocator, object: &StoredObject) -> Asset {
    Asset {
      digest_alg: Some(DIGEST_ALGORITHM.to_string()),
      digest: Some(object.digest.clone()),
      uri: Some(self.inner.assets.uri(&object.bucket, &object.object_name)),
      remote_uri: Some(self.remote_uri(dispatch_id, locator)),
      size: object.size,
    }
  }

  fn remote_uri(&self, dispatch_id: &str, locator: AssetLocator) -> String {
    let route = locator.route(dispatch_id);
    match &self.inner.config.public_url {
      Some(base) => format!("{}{route}", base.trim_end_matches('/')),
      None => route,
    }
  }

  // ---------------------------------------------------------------------------
  // Plumbing
  // ---------------------------------------------------------------------------

  async fn live(&self, dispatch_id: &str) -> Option<Arc<DispatchHandle>> {
    self.inner.live.read().await.get(dispatch_id).cloned()
  }

  pub(crate) async fn handle(&self, dispatch_id: &str) -> Result<Arc<DispatchHandle>, DispatchError> {
    self
      .live(dispatch_id)
      .await
      .ok_or_else(|| DispatchError::NotFound(dispatch_id.to_string()))
  }

  /// Enqueue a message on the dispatch's queue and wait for the reply.
  async fn request<T>(
    &self,
    dispatch_id: &str,
    message: impl FnOnce(oneshot::Sender<Result<T, DispatchError>>) -> StatusMessage,
  ) -> Result<T, DispatchError> {
    let handle = self.handle(dispatch_id).await?;
    let (reply, response) = oneshot::channel();
    handle
      .updates
      .send(message(reply))
      .await
      .map_err(|_| DispatchError::WorkerStopped(dispatch_id.to_string()))?;
    response
      .await
      .map_err(|_| DispatchError::WorkerStopped(dispatch_id.to_string()))?
  }

  /// Deliver a message without waiting for it to be processed.
  pub(crate) fn notify(&self, dispatch_id: String, message: StatusMessage) {
    let dispatcher = self.clone();
    tokio::spawn(async move {
      match dispatcher.handle(&dispatch_id).await {
        Ok(handle) => {
          if handle.updates.send(message).await.is_err() {
            warn!(dispatch_id = %dispatch_id, "notification_dropped");
          }
        }
        Err(err) => warn!(dispatch_id = %dispatch_id, error = %err, "notification_dropped"),
      }
    });
  }
}

fn validate(manifest: &ResultManifest) -> Result<(), DispatchError> {
  if manifest.schema_version != SCHEMA_VERSION {
    return Err(DispatchError::InvalidManifest(format!(
      "unsupported schema version {}",
      manifest.schema_version
    )));
  }
  electra_manifest::deserialize(manifest.clone())
    .map_err(|err| DispatchError::InvalidManifest(err.to_string()))?;

  for node in &manifest.lattice.transport_graph.nodes {
    let status = node.metadata.status;
    if !matches!(status, Status::New | Status::PendingReuse) {
      return Err(DispatchError::InvalidManifest(format!(
        "node {} has status {status}; reset the manifest before registering",
        node.id
      )));
    }
  }
  Ok(())
}

/// Remove server-side locations, keeping digests, sizes and `remote_uri`.
fn hide_locations(mut manifest: ResultManifest) -> ResultManifest {
  for (_, asset) in manifest.assets_mut() {
    asset.uri = None;
  }
  manifest
}
