use std::fmt;
use std::str::FromStr;

use electra_graph::{NodeAssetKey, NodeId};
use serde::{Deserialize, Serialize};

/// Workflow-level asset slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatticeAssetKey {
  WorkflowFunction,
  WorkflowFunctionString,
  Doc,
  Inputs,
  CallBefore,
  CallAfter,
}

impl LatticeAssetKey {
  pub const ALL: [LatticeAssetKey; 6] = [
    LatticeAssetKey::WorkflowFunction,
    LatticeAssetKey::WorkflowFunctionString,
    LatticeAssetKey::Doc,
    LatticeAssetKey::Inputs,
    LatticeAssetKey::CallBefore,
    LatticeAssetKey::CallAfter,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      LatticeAssetKey::WorkflowFunction => "workflow_function",
      LatticeAssetKey::WorkflowFunctionString => "workflow_function_string",
      LatticeAssetKey::Doc => "doc",
      LatticeAssetKey::Inputs => "inputs",
      LatticeAssetKey::CallBefore => "call_before",
      LatticeAssetKey::CallAfter => "call_after",
    }
  }
}

impl FromStr for LatticeAssetKey {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    LatticeAssetKey::ALL
      .into_iter()
      .find(|key| key.as_str() == s)
      .ok_or_else(|| format!("unknown lattice asset key: {s}"))
  }
}

/// Dispatch-level asset slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchAssetKey {
  Inputs,
  Result,
  Error,
}

impl DispatchAssetKey {
  pub const ALL: [DispatchAssetKey; 3] = [
    DispatchAssetKey::Inputs,
    DispatchAssetKey::Result,
    DispatchAssetKey::Error,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      DispatchAssetKey::Inputs => "inputs",
      DispatchAssetKey::Result => "result",
      DispatchAssetKey::Error => "error",
    }
  }
}

impl FromStr for DispatchAssetKey {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    DispatchAssetKey::ALL
      .into_iter()
      .find(|key| key.as_str() == s)
      .ok_or_else(|| format!("unknown dispatch asset key: {s}"))
  }
}

/// Identity of one asset within a dispatch.
///
/// Used to key manifest merges, to name stored objects, and to route
/// asset requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssetLocator {
  Dispatch(DispatchAssetKey),
  Lattice(LatticeAssetKey),
  Node(NodeId, NodeAssetKey),
}

impl AssetLocator {
  /// Object name inside the dispatch's bucket.
  pub fn object_name(&self) -> String {
    match self {
      AssetLocator::Dispatch(key) => format!("dispatch/{}", key.as_str()),
      AssetLocator::Lattice(key) => format!("lattice/{}", key.as_str()),
      AssetLocator::Node(id, key) => format!("node_{id}/{}", key.as_str()),
    }
  }

  /// HTTP path of the asset for `dispatch_id`.
  pub fn route(&self, dispatch_id: &str) -> String {
    match self {
      AssetLocator::Dispatch(key) => format!("/dispatch/{dispatch_id}/assets/{}", key.as_str()),
      AssetLocator::Lattice(key) => {
        format!("/dispatch/{dispatch_id}/lattice/assets/{}", key.as_str())
      }
      AssetLocator::Node(id, key) => {
        format!("/dispatch/{dispatch_id}/electrons/{id}/assets/{}", key.as_str())
      }
    }
  }
}

impl fmt::Display for AssetLocator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.object_name())
  }
}
