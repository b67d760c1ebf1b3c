use thiserror::Error;

use crate::{Scope, Status};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {scope} status transition: {from} -> {to}")]
pub struct StatusTransitionError {
  pub scope: Scope,
  pub from: Status,
  pub to: Status,
}
