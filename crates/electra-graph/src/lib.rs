//! Electra Graph
//!
//! The task graph is the structural backbone of a workflow: a directed
//! multigraph of task nodes connected by parameter-binding edges.
//!
//! - Node ids are dense integers assigned by [`TaskGraph::add_node`] and are
//!   never reused within a graph
//! - Edges must reference existing nodes and may not close a cycle
//! - Several edges may connect the same pair of nodes, one per bound argument
//!
//! The [`diff`] module decides which nodes of a rebuilt graph can reuse the
//! results of a previous run.

pub mod diff;
mod edge;
mod error;
mod graph;
mod node;

pub use diff::{ReusePlan, apply_reuse, plan_reuse};
pub use edge::{Edge, EdgeAttrs, ParamKind};
pub use error::GraphIntegrityError;
pub use graph::TaskGraph;
pub use node::{ExecutorSpec, Node, NodeAssetKey, NodeId, NodeSpec};
