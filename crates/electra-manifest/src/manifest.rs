use std::collections::BTreeMap;

use electra_asset::Asset;
use electra_graph::{Edge, NodeAssetKey, NodeId};
use serde::{Deserialize, Serialize};

use crate::{
  AssetLocator, DispatchAssetKey, DispatchMetadata, LatticeAssetKey, LatticeMetadata, NodeMetadata,
};

/// Current manifest schema version.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeManifest {
  pub id: NodeId,
  pub metadata: NodeMetadata,
  #[serde(default)]
  pub assets: BTreeMap<NodeAssetKey, Asset>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportGraphManifest {
  pub nodes: Vec<NodeManifest>,
  #[serde(default)]
  pub links: Vec<Edge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatticeManifest {
  pub metadata: LatticeMetadata,
  #[serde(default)]
  pub assets: BTreeMap<LatticeAssetKey, Asset>,
  pub transport_graph: TransportGraphManifest,
}

impl LatticeManifest {
  pub fn node(&self, id: NodeId) -> Option<&NodeManifest> {
    self.transport_graph.nodes.iter().find(|node| node.id == id)
  }

  /// Lattice and node assets, keyed by locator.
  pub fn assets(&self) -> Vec<(AssetLocator, &Asset)> {
    let lattice = self
      .assets
      .iter()
      .map(|(key, asset)| (AssetLocator::Lattice(*key), asset));
    let nodes = self.transport_graph.nodes.iter().flat_map(|node| {
      node
        .assets
        .iter()
        .map(move |(key, asset)| (AssetLocator::Node(node.id, *key), asset))
    });
    lattice.chain(nodes).collect()
  }

  pub fn assets_mut(&mut self) -> Vec<(AssetLocator, &mut Asset)> {
    let lattice = self
      .assets
      .iter_mut()
      .map(|(key, asset)| (AssetLocator::Lattice(*key), asset));
    let nodes = self.transport_graph.nodes.iter_mut().flat_map(|node| {
      let id = node.id;
      node
        .assets
        .iter_mut()
        .map(move |(key, asset)| (AssetLocator::Node(id, *key), asset))
    });
    lattice.chain(nodes).collect()
  }
}

/// Asset-reference-only form of a dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultManifest {
  pub schema_version: u32,
  pub metadata: DispatchMetadata,
  #[serde(default)]
  pub assets: BTreeMap<DispatchAssetKey, Asset>,
  pub lattice: LatticeManifest,
}

impl ResultManifest {
  /// Every asset in the tree, keyed by its locator.
  pub fn assets(&self) -> Vec<(AssetLocator, &Asset)> {
    let mut assets: Vec<(AssetLocator, &Asset)> = self
      .assets
      .iter()
      .map(|(key, asset)| (AssetLocator::Dispatch(*key), asset))
      .collect();
    assets.extend(self.lattice.assets());
    assets
  }

  pub fn assets_mut(&mut self) -> Vec<(AssetLocator, &mut Asset)> {
    let mut assets: Vec<(AssetLocator, &mut Asset)> = self
      .assets
      .iter_mut()
      .map(|(key, asset)| (AssetLocator::Dispatch(*key), asset))
      .collect();
    assets.extend(self.lattice.assets_mut());
    assets
  }

  pub fn asset(&self, locator: AssetLocator) -> Option<&Asset> {
    match locator {
      AssetLocator::Dispatch(key) => self.assets.get(&key),
      AssetLocator::Lattice(key) => self.lattice.assets.get(&key),
      AssetLocator::Node(id, key) => self.lattice.node(id).and_then(|node| node.assets.get(&key)),
    }
  }

  pub fn asset_mut(&mut self, locator: AssetLocator) -> Option<&mut Asset> {
    match locator {
      AssetLocator::Dispatch(key) => self.assets.get_mut(&key),
      AssetLocator::Lattice(key) => self.lattice.assets.get_mut(&key),
      AssetLocator::Node(id, key) => self
        .lattice
        .transport_graph
        .nodes
        .iter_mut()
        .find(|node| node.id == id)
        .and_then(|node| node.assets.get_mut(&key)),
    }
  }
}
