//! Re-running a finished dispatch, optionally with a new lattice, replaced
//! callables, and previous results reused.

use std::collections::BTreeMap;

use bytes::Bytes;
use electra_graph::{NodeAssetKey, NodeId, apply_reuse, plan_reuse};
use electra_manifest::{
  AssetLocator, DispatchAssetKey, DispatchMetadata, LatticeManifest, ResultManifest,
  SCHEMA_VERSION,
};
use tracing::{info, instrument};

use crate::{DispatchError, Dispatcher, RegisterOptions};

impl Dispatcher {
  /// Register a new dispatch derived from `parent_id`.
  ///
  /// The new dispatch runs `lattice` when given, otherwise a copy of the
  /// parent's lattice. `electron_updates` replaces the callable of each named
  /// node. With `reuse_previous_results`, nodes whose inputs and callables
  /// are unchanged take over the parent's results instead of running again.
  ///
  /// The new dispatch shares the parent's root dispatch id and is returned
  /// unstarted.
  #[instrument(skip(self, lattice, electron_updates), fields(updates = electron_updates.len()))]
  pub async fn redispatch(
    &self,
    parent_id: &str,
    lattice: Option<LatticeManifest>,
    electron_updates: BTreeMap<String, Bytes>,
    reuse_previous_results: bool,
  ) -> Result<String, DispatchError> {
    let parent = self.load_manifest(parent_id).await?;
    let parent_dispatch = electra_manifest::deserialize(parent.clone())?;

    let dispatch_id = uuid::Uuid::new_v4().to_string();
    let mut assets = BTreeMap::new();
    if let Some(inputs) = parent.assets.get(&DispatchAssetKey::Inputs) {
      assets.insert(DispatchAssetKey::Inputs, inputs.clone());
    }
    let manifest = ResultManifest {
      schema_version: SCHEMA_VERSION,
      metadata: DispatchMetadata {
        dispatch_id: dispatch_id.clone(),
        root_dispatch_id: parent.metadata.root_dispatch_id.clone(),
        ..DispatchMetadata::default()
      },
      assets,
      lattice: lattice.unwrap_or(parent.lattice),
    };
    let mut dispatch = electra_manifest::deserialize(manifest)
      .map_err(|err| DispatchError::InvalidManifest(err.to_string()))?;
    dispatch.reset();

    let targets = resolve_updates(&dispatch, &electron_updates)?;
    let mut written = Vec::new();
    let prepared = async {
      for (node_id, callable) in targets {
        let locator = AssetLocator::Node(node_id, NodeAssetKey::Function);
        let asset = self.store_bytes(&dispatch_id, locator, callable).await?;
        written.push(locator.object_name());
        dispatch.set_asset(locator, asset.into());
      }

      if reuse_previous_results {
        let plan = plan_reuse(parent_dispatch.graph(), dispatch.graph());
        apply_reuse(parent_dispatch.graph(), dispatch.graph_mut(), &plan);
        info!(
          parent_id = %parent_id,
          reusable = plan.reusable.len(),
          dirty = plan.dirty.len(),
          "reuse_planned"
        );
      }

      let manifest = dispatch.to_manifest()?;
      let options = RegisterOptions {
        import_local: true,
        keep_stored: true,
      };
      Ok::<_, DispatchError>(self.register_internal(manifest, options, None).await?)
    }
    .await;

    match prepared {
      Ok(registered) => {
        info!(
          parent_id = %parent_id,
          dispatch_id = %registered.dispatch_id,
          "dispatch_redispatched"
        );
        Ok(registered.dispatch_id)
      }
      Err(err) => {
        self.discard(&dispatch_id, &written).await;
        Err(err)
      }
    }
  }
}

/// Map each update to the node it replaces. Every name must match a node.
fn resolve_updates(
  dispatch: &electra_manifest::Dispatch,
  updates: &BTreeMap<String, Bytes>,
) -> Result<Vec<(NodeId, Bytes)>, DispatchError> {
  let mut targets = Vec::new();
  for (name, callable) in updates {
    let matching: Vec<NodeId> = dispatch
      .graph()
      .nodes()
      .filter(|node| &node.name == name)
      .map(|node| node.id)
      .collect();
    if matching.is_empty() {
      return Err(DispatchError::InvalidRequest(format!(
        "no electron named {name}"
      )));
    }
    targets.extend(matching.into_iter().map(|id| (id, callable.clone())));
  }
  Ok(targets)
}
