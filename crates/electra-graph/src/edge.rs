use serde::{Deserialize, Serialize};

use crate::NodeId;

/// How an edge binds its source's output into the target's call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
  Positional,
  Keyword,
  Unpack,
}

/// Binding attributes of an edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeAttrs {
  /// Parameter name on the target.
  pub name: String,
  pub kind: ParamKind,
  /// Position for positional parameters.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub index: Option<usize>,
}

impl EdgeAttrs {
  pub fn positional(name: impl Into<String>, index: usize) -> Self {
    Self {
      name: name.into(),
      kind: ParamKind::Positional,
      index: Some(index),
    }
  }

  pub fn keyword(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      kind: ParamKind::Keyword,
      index: None,
    }
  }

  pub fn unpack(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      kind: ParamKind::Unpack,
      index: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
  pub source: NodeId,
  pub target: NodeId,
  #[serde(flatten)]
  pub attrs: EdgeAttrs,
}
