use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use electra_manifest::ResultManifest;
use electra_status::Status;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;

use crate::{DispatchRecord, ElectronRecord, Store, StoreError};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) the database at `url` and run migrations.
  pub async fn connect(url: &str) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Private in-memory database, migrated.
  pub async fn in_memory() -> Result<Self, StoreError> {
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect("sqlite::memory:")
      .await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), StoreError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn create_dispatch(&self, record: &DispatchRecord) -> Result<(), StoreError> {
    sqlx::query(
      r#"
            INSERT INTO dispatches (dispatch_id, root_dispatch_id, parent_dispatch_id, parent_node_id, status, manifest, created_at, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(&record.dispatch_id)
    .bind(&record.root_dispatch_id)
    .bind(&record.parent_dispatch_id)
    .bind(record.parent_node_id)
    .bind(&record.status)
    .bind(&record.manifest)
    .bind(record.created_at)
    .bind(record.started_at)
    .bind(record.completed_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_dispatch(&self, dispatch_id: &str) -> Result<DispatchRecord, StoreError> {
    sqlx::query_as(
      r#"
            SELECT dispatch_id, root_dispatch_id, parent_dispatch_id, parent_node_id, status, manifest, created_at, started_at, completed_at
            FROM dispatches
            WHERE dispatch_id = ?
            "#,
    )
    .bind(dispatch_id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(dispatch_id.to_string()))
  }

  async fn update_dispatch_status(
    &self,
    dispatch_id: &str,
    status: Status,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
  ) -> Result<(), StoreError> {
    let result = sqlx::query(
      r#"
            UPDATE dispatches
            SET status = ?, started_at = COALESCE(?, started_at), completed_at = ?
            WHERE dispatch_id = ?
            "#,
    )
    .bind(status.as_str())
    .bind(started_at)
    .bind(completed_at)
    .bind(dispatch_id)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(StoreError::NotFound(dispatch_id.to_string()));
    }
    Ok(())
  }

  async fn save_manifest(
    &self,
    dispatch_id: &str,
    manifest: &ResultManifest,
  ) -> Result<(), StoreError> {
    let result = sqlx::query(
      r#"
            UPDATE dispatches
            SET manifest = ?, status = ?
            WHERE dispatch_id = ?
            "#,
    )
    .bind(Json(manifest))
    .bind(manifest.metadata.status.as_str())
    .bind(dispatch_id)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(StoreError::NotFound(dispatch_id.to_string()));
    }
    Ok(())
  }

  async fn list_children(&self, dispatch_id: &str) -> Result<Vec<DispatchRecord>, StoreError> {
    let records = sqlx::query_as(
      r#"
            SELECT dispatch_id, root_dispatch_id, parent_dispatch_id, parent_node_id, status, manifest, created_at, started_at, completed_at
            FROM dispatches
            WHERE parent_dispatch_id = ?
            ORDER BY parent_node_id ASC, created_at ASC
            "#,
    )
    .bind(dispatch_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(records)
  }

  async fn upsert_electron(&self, record: &ElectronRecord) -> Result<(), StoreError> {
    sqlx::query(
      r#"
            INSERT INTO electrons (dispatch_id, node_id, name, status, sub_dispatch_id, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (dispatch_id, node_id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                sub_dispatch_id = excluded.sub_dispatch_id,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at
            "#,
    )
    .bind(&record.dispatch_id)
    .bind(record.node_id)
    .bind(&record.name)
    .bind(&record.status)
    .bind(&record.sub_dispatch_id)
    .bind(record.started_at)
    .bind(record.completed_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn list_electrons(&self, dispatch_id: &str) -> Result<Vec<ElectronRecord>, StoreError> {
    let records = sqlx::query_as(
      r#"
            SELECT dispatch_id, node_id, name, status, sub_dispatch_id, started_at, completed_at
            FROM electrons
            WHERE dispatch_id = ?
            ORDER BY node_id ASC
            "#,
    )
    .bind(dispatch_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(records)
  }

  async fn delete_dispatch(&self, dispatch_id: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM electrons WHERE dispatch_id = ?")
      .bind(dispatch_id)
      .execute(&self.pool)
      .await?;
    sqlx::query("DELETE FROM dispatches WHERE dispatch_id = ?")
      .bind(dispatch_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }
}
