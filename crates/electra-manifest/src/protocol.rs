//! Client/server registration protocol helpers.

use electra_status::Status;

use crate::{LatticeManifest, ManifestError, ResultManifest};

/// Copy of `manifest` with every location removed; digests and sizes stay.
pub fn strip_local_uris(manifest: &ResultManifest) -> ResultManifest {
  let mut stripped = manifest.clone();
  for (_, asset) in stripped.assets_mut() {
    asset.uri = None;
    asset.remote_uri = None;
  }
  stripped
}

/// Copy of `lattice` with every location removed.
pub fn strip_lattice_uris(lattice: &LatticeManifest) -> LatticeManifest {
  let mut stripped = lattice.clone();
  for (_, asset) in stripped.assets_mut() {
    asset.uri = None;
    asset.remote_uri = None;
  }
  stripped
}

/// Fold a registration response into the local manifest.
///
/// Assets are matched by locator, never by position. The response may not
/// mention an asset the local manifest lacks.
pub fn merge_response_manifest(
  local: &mut ResultManifest,
  response: &ResultManifest,
) -> Result<(), ManifestError> {
  for (locator, remote) in response.assets() {
    let asset = local
      .asset_mut(locator)
      .ok_or_else(|| ManifestError::UnknownAsset(locator.to_string()))?;
    asset.remote_uri = remote.remote_uri.clone();
  }
  local.metadata.dispatch_id = response.metadata.dispatch_id.clone();
  local.metadata.root_dispatch_id = response.metadata.root_dispatch_id.clone();
  Ok(())
}

/// Clear status and timing on the dispatch and every node.
pub fn reset(manifest: &mut ResultManifest) {
  manifest.metadata.status = Status::New;
  manifest.metadata.start_time = None;
  manifest.metadata.end_time = None;
  for node in &mut manifest.lattice.transport_graph.nodes {
    node.metadata.status = Status::New;
    node.metadata.start_time = None;
    node.metadata.end_time = None;
    node.metadata.sub_dispatch_id = None;
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use electra_asset::{Asset, AssetPayload};
  use electra_graph::{NodeAssetKey, NodeId, NodeSpec, TaskGraph};

  use super::*;
  use crate::{AssetLocator, Dispatch, Lattice};

  fn stored(name: &str) -> AssetPayload {
    AssetPayload::Stored(Asset::for_bytes(name.as_bytes(), format!("file:///tmp/{name}")))
  }

  fn manifest() -> ResultManifest {
    let mut graph = TaskGraph::new();
    for k in 0..3 {
      graph.add_node(
        NodeSpec::new(format!("task{k}"))
          .with_asset(NodeAssetKey::Function, stored(&format!("fn{k}"))),
      );
    }
    Dispatch::new(Lattice::new("flow", graph)).to_manifest().unwrap()
  }

  #[test]
  fn test_strip_keeps_digest_and_size() {
    let original = manifest();
    let stripped = strip_local_uris(&original);
    for ((locator, before), (_, after)) in original.assets().into_iter().zip(stripped.assets()) {
      assert!(after.uri.is_none(), "{locator}");
      assert_eq!(after.digest, before.digest);
      assert_eq!(after.size, before.size);
    }
  }

  #[test]
  fn test_strip_lattice_clears_node_and_lattice_locations() {
    let original = manifest().lattice;
    let stripped = strip_lattice_uris(&original);
    assert_eq!(stripped.assets().len(), original.assets().len());
    for (locator, asset) in stripped.assets() {
      assert!(asset.uri.is_none() && asset.remote_uri.is_none(), "{locator}");
      assert!(asset.digest.is_some(), "{locator}");
    }
  }

  #[test]
  fn test_merge_is_keyed_by_identity() {
    let mut local = manifest();
    let mut response = strip_local_uris(&local);
    response.metadata.dispatch_id = "d-1".to_string();
    response.metadata.root_dispatch_id = "d-1".to_string();
    for (locator, asset) in response.assets_mut() {
      asset.remote_uri = Some(format!("http://server{}", locator.route("d-1")));
    }
    response.lattice.transport_graph.nodes.reverse();

    merge_response_manifest(&mut local, &response).unwrap();

    assert_eq!(local.metadata.dispatch_id, "d-1");
    let asset = local
      .asset(AssetLocator::Node(NodeId(2), NodeAssetKey::Function))
      .unwrap();
    assert_eq!(
      asset.remote_uri.as_deref(),
      Some("http://server/dispatch/d-1/electrons/2/assets/function")
    );
    assert_eq!(asset.uri.as_deref(), Some("file:///tmp/fn2"));
  }

  #[test]
  fn test_merge_rejects_unknown_asset() {
    let mut local = manifest();
    let mut response = local.clone();
    response.lattice.transport_graph.nodes[0]
      .assets
      .insert(NodeAssetKey::Output, Asset::default());
    assert!(matches!(
      merge_response_manifest(&mut local, &response),
      Err(ManifestError::UnknownAsset(name)) if name == "node_0/output"
    ));
  }

  #[test]
  fn test_reset_clears_statuses() {
    let mut manifest = manifest();
    manifest.metadata.status = Status::Completed;
    manifest.metadata.end_time = Some(Utc::now());
    for node in &mut manifest.lattice.transport_graph.nodes {
      node.metadata.status = Status::Failed;
      node.metadata.start_time = Some(Utc::now());
    }

    reset(&mut manifest);

    assert_eq!(manifest.metadata.status, Status::New);
    assert!(manifest.metadata.end_time.is_none());
    assert!(manifest
      .lattice
      .transport_graph
      .nodes
      .iter()
      .all(|node| node.metadata.status == Status::New && node.metadata.start_time.is_none()));
  }
}
