//! Electra Status
//!
//! The closed status vocabulary shared by dispatches and their nodes, the
//! category lookup for each status, and the transition tables that decide
//! which updates are legal.
//!
//! Node and dispatch lifecycles share one enum but follow different rules,
//! so every check takes a [`Scope`].

mod error;
mod status;
mod summary;
mod transition;

pub use error::StatusTransitionError;
pub use status::{Status, StatusCategory};
pub use summary::StatusSummary;
pub use transition::{Scope, Transition, check_transition};
