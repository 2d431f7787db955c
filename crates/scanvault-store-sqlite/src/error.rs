//! Error type for `scanvault-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The store is not open (never opened, or already disposed).
  #[error("store is not initialized")]
  NotInitialized,

  #[error("store initialization failed: {0}")]
  Initialization(String),

  #[error("encryption error: {0}")]
  Encryption(#[from] scanvault_crypto::EncryptionError),

  #[error("failed to save record: {0}")]
  SaveFailed(#[source] tokio_rusqlite::Error),

  #[error("failed to read records: {0}")]
  ReadFailed(#[source] tokio_rusqlite::Error),

  #[error("failed to delete records: {0}")]
  DeleteFailed(#[source] tokio_rusqlite::Error),

  #[error("migration to version {version} failed: {reason}")]
  MigrationFailed { version: u32, reason: String },

  #[error("schema integrity check failed: {0}")]
  IntegrityFailed(String),

  /// A single stored record could not be opened or verified.
  #[error("record {id} is corrupt: {reason}")]
  CorruptRecord { id: String, reason: String },

  #[error("core error: {0}")]
  Core(#[from] scanvault_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
