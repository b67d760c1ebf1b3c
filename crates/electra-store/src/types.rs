use chrono::{DateTime, Utc};
use electra_graph::NodeId;
use electra_manifest::ResultManifest;
use electra_status::Status;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

use crate::StoreError;

/// A dispatch as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DispatchRecord {
  pub dispatch_id: String,
  pub root_dispatch_id: String,
  pub parent_dispatch_id: Option<String>,
  pub parent_node_id: Option<i64>,
  pub status: String,
  pub manifest: Json<ResultManifest>,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl DispatchRecord {
  /// Record for a freshly registered dispatch.
  pub fn new(manifest: &ResultManifest, parent: Option<(&str, NodeId)>) -> Self {
    Self {
      dispatch_id: manifest.metadata.dispatch_id.clone(),
      root_dispatch_id: manifest.metadata.root_dispatch_id.clone(),
      parent_dispatch_id: parent.map(|(id, _)| id.to_string()),
      parent_node_id: parent.map(|(_, node)| node.0 as i64),
      status: manifest.metadata.status.as_str().to_string(),
      manifest: Json(manifest.clone()),
      created_at: Utc::now(),
      started_at: manifest.metadata.start_time,
      completed_at: manifest.metadata.end_time,
    }
  }

  pub fn status(&self) -> Result<Status, StoreError> {
    self
      .status
      .parse()
      .map_err(|_| StoreError::InvalidStatus(self.status.clone()))
  }
}

/// An electron (node) as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ElectronRecord {
  pub dispatch_id: String,
  pub node_id: i64,
  pub name: String,
  pub status: String,
  pub sub_dispatch_id: Option<String>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl ElectronRecord {
  pub fn status(&self) -> Result<Status, StoreError> {
    self
      .status
      .parse()
      .map_err(|_| StoreError::InvalidStatus(self.status.clone()))
  }
}
