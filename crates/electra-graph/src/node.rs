use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use electra_asset::AssetPayload;
use electra_status::Status;
use serde::{Deserialize, Serialize};

/// Dense, graph-local node identifier.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl FromStr for NodeId {
  type Err = std::num::ParseIntError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    s.parse().map(NodeId)
  }
}

/// Asset slots carried by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAssetKey {
  Function,
  FunctionString,
  Value,
  Output,
  Stdout,
  Stderr,
  Error,
  CallBefore,
  CallAfter,
}

impl NodeAssetKey {
  pub const ALL: [NodeAssetKey; 9] = [
    NodeAssetKey::Function,
    NodeAssetKey::FunctionString,
    NodeAssetKey::Value,
    NodeAssetKey::Output,
    NodeAssetKey::Stdout,
    NodeAssetKey::Stderr,
    NodeAssetKey::Error,
    NodeAssetKey::CallBefore,
    NodeAssetKey::CallAfter,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      NodeAssetKey::Function => "function",
      NodeAssetKey::FunctionString => "function_string",
      NodeAssetKey::Value => "value",
      NodeAssetKey::Output => "output",
      NodeAssetKey::Stdout => "stdout",
      NodeAssetKey::Stderr => "stderr",
      NodeAssetKey::Error => "error",
      NodeAssetKey::CallBefore => "call_before",
      NodeAssetKey::CallAfter => "call_after",
    }
  }

  /// Slots produced by execution rather than by the workflow author.
  pub fn is_result(self) -> bool {
    matches!(
      self,
      NodeAssetKey::Output | NodeAssetKey::Stdout | NodeAssetKey::Stderr | NodeAssetKey::Error
    )
  }
}

impl fmt::Display for NodeAssetKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for NodeAssetKey {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    NodeAssetKey::ALL
      .into_iter()
      .find(|key| key.as_str() == s)
      .ok_or_else(|| format!("unknown node asset key: {s}"))
  }
}

/// Executor assignment: a registered executor name plus opaque settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSpec {
  pub name: String,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub config: BTreeMap<String, serde_json::Value>,
}

impl ExecutorSpec {
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      config: BTreeMap::new(),
    }
  }
}

/// A task node (electron).
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
  pub id: NodeId,
  pub name: String,
  /// Nodes sharing a group id are scheduling siblings.
  pub task_group_id: NodeId,
  pub executor: ExecutorSpec,
  /// The node returns a workflow that runs as a child dispatch.
  pub sublattice: bool,
  pub assets: BTreeMap<NodeAssetKey, AssetPayload>,
  /// Free-form extension data.
  pub extensions: BTreeMap<String, Vec<u8>>,
  pub status: Status,
  pub start_time: Option<DateTime<Utc>>,
  pub end_time: Option<DateTime<Utc>>,
  pub sub_dispatch_id: Option<String>,
}

impl Node {
  pub fn asset(&self, key: NodeAssetKey) -> Option<&AssetPayload> {
    self.assets.get(&key)
  }

  /// Digest of the given slot, if present.
  pub fn digest(&self, key: NodeAssetKey) -> Option<String> {
    self.asset(key).and_then(AssetPayload::digest)
  }

  /// A parameter node carries a value and nothing to call.
  pub fn is_parameter(&self) -> bool {
    !self.assets.contains_key(&NodeAssetKey::Function)
  }

  /// Clear execution state so the node runs again.
  pub fn reset(&mut self) {
    self.status = Status::New;
    self.start_time = None;
    self.end_time = None;
    self.sub_dispatch_id = None;
    self.assets.retain(|key, _| !key.is_result());
  }
}

/// Author-supplied attributes of a node, consumed by [`crate::TaskGraph::add_node`].
#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
  pub name: String,
  pub task_group_id: Option<NodeId>,
  pub executor: ExecutorSpec,
  pub sublattice: bool,
  pub assets: BTreeMap<NodeAssetKey, AssetPayload>,
  pub extensions: BTreeMap<String, Vec<u8>>,
}

impl NodeSpec {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Self::default()
    }
  }

  pub fn with_function(self, data: impl Into<Bytes>) -> Self {
    self.with_asset(NodeAssetKey::Function, AssetPayload::inline(data))
  }

  pub fn with_value(self, data: impl Into<Bytes>) -> Self {
    self.with_asset(NodeAssetKey::Value, AssetPayload::inline(data))
  }

  pub fn with_asset(mut self, key: NodeAssetKey, payload: AssetPayload) -> Self {
    self.assets.insert(key, payload);
    self
  }

  pub fn with_executor(mut self, executor: ExecutorSpec) -> Self {
    self.executor = executor;
    self
  }

  pub fn with_task_group(mut self, group: NodeId) -> Self {
    self.task_group_id = Some(group);
    self
  }

  pub fn with_extension(mut self, key: impl Into<String>, value: Vec<u8>) -> Self {
    self.extensions.insert(key.into(), value);
    self
  }

  pub fn sublattice(mut self) -> Self {
    self.sublattice = true;
    self
  }

  pub(crate) fn into_node(self, id: NodeId) -> Node {
    Node {
      id,
      name: self.name,
      task_group_id: self.task_group_id.unwrap_or(id),
      executor: self.executor,
      sublattice: self.sublattice,
      assets: self.assets,
      extensions: self.extensions,
      status: Status::New,
      start_time: None,
      end_time: None,
      sub_dispatch_id: None,
    }
  }
}
