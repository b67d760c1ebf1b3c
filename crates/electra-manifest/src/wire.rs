//! JSON bodies exchanged over HTTP between clients, executors and the server.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use electra_asset::Asset;
use electra_graph::{EdgeAttrs, ExecutorSpec, NodeId};
use electra_status::Status;
use serde::{Deserialize, Serialize};

use crate::{LatticeManifest, ResultManifest};

/// Executor-facing status report for one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
  pub status: Status,
  /// Base64 encoded output value.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stdout: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stderr: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  /// Workflow returned by a sub-workflow node, with `file://` assets the
  /// server can read.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sublattice: Option<Box<ResultManifest>>,
}

impl JobReport {
  pub fn running() -> Self {
    Self {
      status: Status::Running,
      ..Self::default()
    }
  }

  pub fn completed(output: &[u8]) -> Self {
    Self {
      status: Status::Completed,
      output: Some(STANDARD.encode(output)),
      ..Self::default()
    }
  }

  pub fn failed(error: impl Into<String>) -> Self {
    Self {
      status: Status::Failed,
      error: Some(error.into()),
      ..Self::default()
    }
  }

  pub fn output_bytes(&self) -> Result<Option<Bytes>, base64::DecodeError> {
    self
      .output
      .as_deref()
      .map(|encoded| STANDARD.decode(encoded).map(Bytes::from))
      .transpose()
  }
}

/// Body of `POST /dispatch/resubmit`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResubmitRequest {
  pub dispatch_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub json_lattice: Option<LatticeManifest>,
  /// Node name to base64 encoded replacement callable.
  #[serde(default)]
  pub electron_updates: BTreeMap<String, String>,
  #[serde(default)]
  pub reuse_previous_results: bool,
}

impl ResubmitRequest {
  pub fn decoded_updates(&self) -> Result<BTreeMap<String, Bytes>, base64::DecodeError> {
    self
      .electron_updates
      .iter()
      .map(|(name, encoded)| Ok((name.clone(), Bytes::from(STANDARD.decode(encoded)?))))
      .collect()
  }

  pub fn encode_update(callable: &[u8]) -> String {
    STANDARD.encode(callable)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchIdResponse {
  pub dispatch_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatusView {
  pub id: NodeId,
  pub name: String,
  pub status: Status,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sub_dispatch_id: Option<String>,
  pub start_time: Option<DateTime<Utc>>,
  pub end_time: Option<DateTime<Utc>>,
}

/// Body of `GET /dispatch/{id}/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStatusView {
  pub dispatch_id: String,
  pub root_dispatch_id: String,
  pub status: Status,
  pub start_time: Option<DateTime<Utc>>,
  pub end_time: Option<DateTime<Utc>>,
  pub nodes: Vec<NodeStatusView>,
}

impl DispatchStatusView {
  pub fn from_manifest(manifest: &ResultManifest) -> Self {
    Self {
      dispatch_id: manifest.metadata.dispatch_id.clone(),
      root_dispatch_id: manifest.metadata.root_dispatch_id.clone(),
      status: manifest.metadata.status,
      start_time: manifest.metadata.start_time,
      end_time: manifest.metadata.end_time,
      nodes: manifest
        .lattice
        .transport_graph
        .nodes
        .iter()
        .map(|node| NodeStatusView {
          id: node.id,
          name: node.metadata.name.clone(),
          status: node.metadata.status,
          sub_dispatch_id: node.metadata.sub_dispatch_id.clone(),
          start_time: node.metadata.start_time,
          end_time: node.metadata.end_time,
        })
        .collect(),
    }
  }
}

/// One bound argument of a job: the upstream node's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobArgument {
  pub source: NodeId,
  #[serde(flatten)]
  pub binding: EdgeAttrs,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<Asset>,
}

/// A unit of work handed to an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskJob {
  pub dispatch_id: String,
  pub node_id: NodeId,
  pub name: String,
  pub executor: ExecutorSpec,
  #[serde(default)]
  pub sublattice: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub function: Option<Asset>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<Asset>,
  #[serde(default)]
  pub arguments: Vec<JobArgument>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_job_report_output_is_base64() {
    let report = JobReport::completed(b"\x00\x01result");
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "COMPLETED");
    assert_eq!(json["output"], "AAFyZXN1bHQ=");
    assert!(json.get("error").is_none());

    let parsed: JobReport = serde_json::from_value(json).unwrap();
    assert_eq!(
      parsed.output_bytes().unwrap().as_deref(),
      Some(&b"\x00\x01result"[..])
    );
  }

  #[test]
  fn test_minimal_report_parses() {
    let report: JobReport = serde_json::from_str(r#"{"status":"FAILED","error":"boom"}"#).unwrap();
    assert_eq!(report.status, Status::Failed);
    assert_eq!(report.output_bytes().unwrap(), None);
  }

  #[test]
  fn test_resubmit_updates_decode() {
    let mut request = ResubmitRequest {
      dispatch_id: "d".to_string(),
      ..ResubmitRequest::default()
    };
    request
      .electron_updates
      .insert("task1".to_string(), ResubmitRequest::encode_update(b"new fn"));
    let updates = request.decoded_updates().unwrap();
    assert_eq!(updates["task1"], Bytes::from_static(b"new fn"));

    request.electron_updates.insert("bad".to_string(), "***".to_string());
    assert!(request.decoded_updates().is_err());
  }
}
