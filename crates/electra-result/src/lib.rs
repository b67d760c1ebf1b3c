//! Electra Result
//!
//! A [`ResultStore`] is the live representation of one dispatch: its task
//! graph with node statuses, its dispatch status, and the channels through
//! which observers follow progress.
//!
//! All mutation goes through the store's update methods, which hold a single
//! per-dispatch lock, so updates to one dispatch never interleave while
//! unrelated dispatches proceed independently.

mod error;
mod events;
mod store;

pub use error::ResultError;
pub use events::DispatchEvent;
pub use store::{NodeUpdate, ParentLink, ResultStore};
