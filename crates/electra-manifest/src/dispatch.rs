use std::collections::BTreeMap;
use std::path::Path;

use bytes::Bytes;
use electra_asset::{Asset, AssetPayload, file_uri};
use electra_graph::{Node, NodeId, TaskGraph};
use electra_status::Status;
use tokio::fs;

use crate::{
  AssetLocator, DispatchAssetKey, DispatchMetadata, LatticeAssetKey, LatticeManifest,
  LatticeMetadata, ManifestError, NodeManifest, NodeMetadata, ResultManifest, SCHEMA_VERSION,
  TransportGraphManifest,
};

/// A named workflow definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Lattice {
  pub metadata: LatticeMetadata,
  pub assets: BTreeMap<LatticeAssetKey, AssetPayload>,
  pub graph: TaskGraph,
}

impl Lattice {
  pub fn new(name: impl Into<String>, graph: TaskGraph) -> Self {
    Self {
      metadata: LatticeMetadata {
        name: name.into(),
        ..LatticeMetadata::default()
      },
      assets: BTreeMap::new(),
      graph,
    }
  }

  pub fn with_asset(mut self, key: LatticeAssetKey, payload: AssetPayload) -> Self {
    self.assets.insert(key, payload);
    self
  }

  /// Node whose output becomes the dispatch result.
  pub fn result_node(&self) -> Option<NodeId> {
    self
      .metadata
      .result_node
      .or_else(|| self.graph.node_ids().last())
  }
}

/// One execution instance of a lattice.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
  pub metadata: DispatchMetadata,
  pub assets: BTreeMap<DispatchAssetKey, AssetPayload>,
  pub lattice: Lattice,
}

impl Dispatch {
  pub fn new(lattice: Lattice) -> Self {
    Self {
      metadata: DispatchMetadata::default(),
      assets: BTreeMap::new(),
      lattice,
    }
  }

  pub fn with_id(mut self, dispatch_id: impl Into<String>) -> Self {
    self.metadata.dispatch_id = dispatch_id.into();
    self
  }

  pub fn with_asset(mut self, key: DispatchAssetKey, payload: AssetPayload) -> Self {
    self.assets.insert(key, payload);
    self
  }

  pub fn id(&self) -> &str {
    &self.metadata.dispatch_id
  }

  pub fn status(&self) -> Status {
    self.metadata.status
  }

  pub fn graph(&self) -> &TaskGraph {
    &self.lattice.graph
  }

  pub fn graph_mut(&mut self) -> &mut TaskGraph {
    &mut self.lattice.graph
  }

  pub fn asset(&self, locator: AssetLocator) -> Option<&AssetPayload> {
    match locator {
      AssetLocator::Dispatch(key) => self.assets.get(&key),
      AssetLocator::Lattice(key) => self.lattice.assets.get(&key),
      AssetLocator::Node(id, key) => self.lattice.graph.get_node(id).and_then(|n| n.asset(key)),
    }
  }

  /// Fill an asset slot. Returns false when the node does not exist.
  pub fn set_asset(&mut self, locator: AssetLocator, payload: AssetPayload) -> bool {
    match locator {
      AssetLocator::Dispatch(key) => {
        self.assets.insert(key, payload);
      }
      AssetLocator::Lattice(key) => {
        self.lattice.assets.insert(key, payload);
      }
      AssetLocator::Node(id, key) => match self.lattice.graph.get_node_mut(id) {
        Some(node) => {
          node.assets.insert(key, payload);
        }
        None => return false,
      },
    }
    true
  }

  /// Clear dispatch and node execution state.
  pub fn reset(&mut self) {
    self.metadata.status = Status::New;
    self.metadata.start_time = None;
    self.metadata.end_time = None;
    self.assets.remove(&DispatchAssetKey::Result);
    self.assets.remove(&DispatchAssetKey::Error);
    self.lattice.graph.reset();
  }

  /// Describe this dispatch by asset reference. Every payload must already
  /// be stored.
  pub fn to_manifest(&self) -> Result<ResultManifest, ManifestError> {
    let stored = |locator: AssetLocator, payload: &AssetPayload| {
      payload
        .as_asset()
        .cloned()
        .ok_or_else(|| ManifestError::InlinePayload(locator.to_string()))
    };

    let assets = self
      .assets
      .iter()
      .map(|(key, payload)| Ok((*key, stored(AssetLocator::Dispatch(*key), payload)?)))
      .collect::<Result<_, ManifestError>>()?;
    let lattice_assets = self
      .lattice
      .assets
      .iter()
      .map(|(key, payload)| Ok((*key, stored(AssetLocator::Lattice(*key), payload)?)))
      .collect::<Result<_, ManifestError>>()?;

    let mut nodes = Vec::with_capacity(self.lattice.graph.len());
    for node in self.lattice.graph.nodes() {
      let assets = node
        .assets
        .iter()
        .map(|(key, payload)| Ok((*key, stored(AssetLocator::Node(node.id, *key), payload)?)))
        .collect::<Result<_, ManifestError>>()?;
      nodes.push(NodeManifest {
        id: node.id,
        metadata: node_metadata(node),
        assets,
      });
    }

    Ok(ResultManifest {
      schema_version: SCHEMA_VERSION,
      metadata: self.metadata.clone(),
      assets,
      lattice: LatticeManifest {
        metadata: self.lattice.metadata.clone(),
        assets: lattice_assets,
        transport_graph: TransportGraphManifest {
          nodes,
          links: self.lattice.graph.edges().to_vec(),
        },
      },
    })
  }
}

fn node_metadata(node: &Node) -> NodeMetadata {
  NodeMetadata {
    name: node.name.clone(),
    task_group_id: node.task_group_id,
    executor: node.executor.clone(),
    sublattice: node.sublattice,
    extensions: node.extensions.clone(),
    status: node.status,
    start_time: node.start_time,
    end_time: node.end_time,
    sub_dispatch_id: node.sub_dispatch_id.clone(),
  }
}

/// Write every inline payload of `dispatch` under `storage_path` and
/// return the manifest describing the result.
///
/// Payloads that are already stored keep their descriptor.
pub async fn serialize(dispatch: &Dispatch, storage_path: &Path) -> Result<ResultManifest, ManifestError> {
  let mut stored = dispatch.clone();
  let locators: Vec<AssetLocator> = collect_locators(dispatch);

  for locator in locators {
    let Some(AssetPayload::Inline(data)) = dispatch.asset(locator) else {
      continue;
    };
    let asset = write_local(storage_path, locator, data).await?;
    stored.set_asset(locator, AssetPayload::Stored(asset));
  }

  stored.to_manifest()
}

fn collect_locators(dispatch: &Dispatch) -> Vec<AssetLocator> {
  let mut locators: Vec<AssetLocator> = dispatch
    .assets
    .keys()
    .map(|key| AssetLocator::Dispatch(*key))
    .collect();
  locators.extend(dispatch.lattice.assets.keys().map(|key| AssetLocator::Lattice(*key)));
  for node in dispatch.lattice.graph.nodes() {
    locators.extend(node.assets.keys().map(|key| AssetLocator::Node(node.id, *key)));
  }
  locators
}

async fn write_local(
  storage_path: &Path,
  locator: AssetLocator,
  data: &Bytes,
) -> Result<Asset, ManifestError> {
  let path = storage_path.join(locator.object_name());
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).await?;
  }
  fs::write(&path, data).await?;
  let path = fs::canonicalize(&path).await?;
  Ok(Asset::for_bytes(data, file_uri(&path)))
}

/// Rebuild a live dispatch from a manifest. Asset bytes are not read.
pub fn deserialize(manifest: ResultManifest) -> Result<Dispatch, ManifestError> {
  if manifest.schema_version != SCHEMA_VERSION {
    return Err(ManifestError::UnsupportedSchema(manifest.schema_version));
  }

  let lattice = manifest.lattice;
  let nodes = lattice.transport_graph.nodes.into_iter().map(|node| {
    let metadata = node.metadata;
    Node {
      id: node.id,
      name: metadata.name,
      task_group_id: metadata.task_group_id,
      executor: metadata.executor,
      sublattice: metadata.sublattice,
      assets: stored_payloads(node.assets),
      extensions: metadata.extensions,
      status: metadata.status,
      start_time: metadata.start_time,
      end_time: metadata.end_time,
      sub_dispatch_id: metadata.sub_dispatch_id,
    }
  });
  let graph = TaskGraph::from_parts(nodes, lattice.transport_graph.links)?;

  Ok(Dispatch {
    metadata: manifest.metadata,
    assets: stored_payloads(manifest.assets),
    lattice: Lattice {
      metadata: lattice.metadata,
      assets: stored_payloads(lattice.assets),
      graph,
    },
  })
}

fn stored_payloads<K: Ord>(assets: BTreeMap<K, Asset>) -> BTreeMap<K, AssetPayload> {
  assets
    .into_iter()
    .map(|(key, asset)| (key, AssetPayload::Stored(asset)))
    .collect()
}
