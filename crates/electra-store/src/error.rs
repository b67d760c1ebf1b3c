use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("dispatch not found: {0}")]
  NotFound(String),

  #[error("stored status is invalid: {0}")]
  InvalidStatus(String),

  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("migration failed: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}
