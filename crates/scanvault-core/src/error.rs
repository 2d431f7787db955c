//! Error types for `scanvault-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("unknown entity type: {0:?}")]
  UnknownEntityType(String),

  #[error("unknown audit action: {0:?}")]
  UnknownAction(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
