use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use electra_graph::{ExecutorSpec, NodeId};
use electra_status::Status;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMetadata {
  /// Empty until assigned by the client or the server.
  #[serde(default)]
  pub dispatch_id: String,
  /// Self for top-level dispatches, the parent's root for sublattices and
  /// redispatches.
  #[serde(default)]
  pub root_dispatch_id: String,
  #[serde(default)]
  pub status: Status,
  #[serde(default)]
  pub start_time: Option<DateTime<Utc>>,
  #[serde(default)]
  pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatticeMetadata {
  pub name: String,
  /// Default executor for nodes that do not name one.
  #[serde(default)]
  pub executor: ExecutorSpec,
  #[serde(default)]
  pub workflow_executor: ExecutorSpec,
  /// Node whose output becomes the dispatch result. Defaults to the node
  /// with the highest id.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result_node: Option<NodeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
  pub name: String,
  pub task_group_id: NodeId,
  #[serde(default)]
  pub executor: ExecutorSpec,
  #[serde(default)]
  pub sublattice: bool,
  #[serde(default, with = "base64_map", skip_serializing_if = "BTreeMap::is_empty")]
  pub extensions: BTreeMap<String, Vec<u8>>,
  #[serde(default)]
  pub status: Status,
  #[serde(default)]
  pub start_time: Option<DateTime<Utc>>,
  #[serde(default)]
  pub end_time: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sub_dispatch_id: Option<String>,
}

mod base64_map {
  use std::collections::BTreeMap;

  use base64::Engine;
  use base64::engine::general_purpose::STANDARD;
  use serde::de::Error;
  use serde::{Deserialize, Deserializer, Serialize, Serializer};

  pub fn serialize<S: Serializer>(
    map: &BTreeMap<String, Vec<u8>>,
    serializer: S,
  ) -> Result<S::Ok, S::Error> {
    map
      .iter()
      .map(|(key, value)| (key, STANDARD.encode(value)))
      .collect::<BTreeMap<_, _>>()
      .serialize(serializer)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(
    deserializer: D,
  ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
    BTreeMap::<String, String>::deserialize(deserializer)?
      .into_iter()
      .map(|(key, value)| {
        STANDARD
          .decode(value)
          .map(|bytes| (key, bytes))
          .map_err(D::Error::custom)
      })
      .collect()
  }
}
