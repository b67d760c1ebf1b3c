//! Electra Store
//!
//! Persistent records for dispatches and their electrons. The live state of
//! a running dispatch is held in memory; this crate keeps the durable copy
//! that lets a finished dispatch be inspected or redispatched after it has
//! left memory.
//!
//! The [`Store`] trait defines operations for:
//! - Creating dispatch records and tracking their status
//! - Saving the latest manifest snapshot of a dispatch
//! - Recording per-electron status
//! - Walking parent/child links between dispatches

mod error;
mod sqlite;
mod types;

pub use error::StoreError;
pub use sqlite::SqliteStore;
pub use types::{DispatchRecord, ElectronRecord};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use electra_manifest::ResultManifest;
use electra_status::Status;

/// Storage trait for dispatch and electron records.
#[async_trait]
pub trait Store: Send + Sync {
  /// Create a new dispatch record.
  async fn create_dispatch(&self, record: &DispatchRecord) -> Result<(), StoreError>;

  /// Get a dispatch by ID.
  async fn get_dispatch(&self, dispatch_id: &str) -> Result<DispatchRecord, StoreError>;

  /// Update the status and timing of a dispatch.
  async fn update_dispatch_status(
    &self,
    dispatch_id: &str,
    status: Status,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
  ) -> Result<(), StoreError>;

  /// Replace the manifest snapshot of a dispatch.
  async fn save_manifest(
    &self,
    dispatch_id: &str,
    manifest: &ResultManifest,
  ) -> Result<(), StoreError>;

  /// Dispatches spawned by nodes of `dispatch_id`.
  async fn list_children(&self, dispatch_id: &str) -> Result<Vec<DispatchRecord>, StoreError>;

  /// Insert or update one electron record.
  async fn upsert_electron(&self, record: &ElectronRecord) -> Result<(), StoreError>;

  /// Electrons of a dispatch in node-id order.
  async fn list_electrons(&self, dispatch_id: &str) -> Result<Vec<ElectronRecord>, StoreError>;

  /// Remove a dispatch and its electrons.
  async fn delete_dispatch(&self, dispatch_id: &str) -> Result<(), StoreError>;
}
