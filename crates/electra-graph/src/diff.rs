//! Graph diff for partial reuse of a previous run.
//!
//! A node of the new graph reuses the old result when the old graph has a
//! node with the same id and name that completed, with the same callable and
//! value digests and the same incoming edges. Every other node is dirty, and
//! so is everything reachable from a dirty node.

use std::collections::BTreeSet;

use electra_status::Status;

use crate::{EdgeAttrs, NodeAssetKey, NodeId, TaskGraph};

/// Which nodes of a new graph can take their result from an old one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReusePlan {
  pub reusable: BTreeSet<NodeId>,
  pub dirty: BTreeSet<NodeId>,
}

/// Compare `new` against `old` and split its nodes into reusable and dirty.
pub fn plan_reuse(old: &TaskGraph, new: &TaskGraph) -> ReusePlan {
  let seeds: Vec<NodeId> = new
    .nodes()
    .filter(|node| !matches_previous(old, new, node.id))
    .map(|node| node.id)
    .collect();

  let dirty = new.reachable_from(seeds);
  let reusable = new.node_ids().filter(|id| !dirty.contains(id)).collect();
  ReusePlan { reusable, dirty }
}

fn matches_previous(old: &TaskGraph, new: &TaskGraph, id: NodeId) -> bool {
  let (Some(previous), Some(current)) = (old.get_node(id), new.get_node(id)) else {
    return false;
  };

  previous.status == Status::Completed
    && previous.name == current.name
    && previous.digest(NodeAssetKey::Function) == current.digest(NodeAssetKey::Function)
    && previous.digest(NodeAssetKey::Value) == current.digest(NodeAssetKey::Value)
    && incoming_signature(old, id) == incoming_signature(new, id)
}

fn incoming_signature(graph: &TaskGraph, id: NodeId) -> Vec<(NodeId, EdgeAttrs)> {
  let mut signature: Vec<_> = graph
    .incoming_edges(id)
    .into_iter()
    .map(|edge| (edge.source, edge.attrs.clone()))
    .collect();
  signature.sort();
  signature
}

/// Mark the reusable nodes of `new` as `PENDING_REUSE` and copy their
/// results and timing from `old`. Dirty nodes are reset.
pub fn apply_reuse(old: &TaskGraph, new: &mut TaskGraph, plan: &ReusePlan) {
  for node in new.nodes_mut() {
    let previous = old.get_node(node.id).filter(|_| plan.reusable.contains(&node.id));
    node.reset();

    if let Some(previous) = previous {
      node.status = Status::PendingReuse;
      node.start_time = previous.start_time;
      node.end_time = previous.end_time;
      for (key, payload) in &previous.assets {
        if key.is_result() {
          node.assets.insert(*key, payload.clone());
        }
      }
    }
  }
}
