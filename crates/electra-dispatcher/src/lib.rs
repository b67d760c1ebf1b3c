//! Electra Dispatcher
//!
//! The [`Dispatcher`] turns registered workflow manifests into running
//! dispatches. It never runs task code itself: ready nodes are handed to a
//! [`TaskExecutor`], and outcomes come back through
//! [`Dispatcher::mark_node_ready`].
//!
//! A dispatch moves through these phases:
//!
//! 1. **register** validates the manifest, assigns storage locations and
//!    persists the dispatch record
//! 2. **start** marks the dispatch `RUNNING` and submits every node with no
//!    unfinished dependency
//! 3. **mark_node_ready** records each outcome and submits the nodes it
//!    unblocked; a completed sub-workflow node becomes a child dispatch
//!    whose result is folded back into the node
//! 4. **postprocessing** copies the result node's output to the dispatch
//!    result once every node has completed
//!
//! Status changes for one dispatch are applied by a single worker task in
//! the order they arrive. Different dispatches never share a worker.

mod config;
mod dispatcher;
mod error;
mod executor;
mod redispatch;
mod types;
mod worker;

pub use config::DispatcherConfig;
pub use dispatcher::Dispatcher;
pub use electra_manifest::wire::TaskJob;
pub use electra_status::{Status, Transition};
pub use error::DispatchError;
pub use executor::{ChannelExecutor, ExecutorError, ExecutorRegistry, JobQueue, TaskExecutor};
pub use types::{AssetRead, NodeOutcome, RegisterOptions, RegisteredDispatch, Representation};
