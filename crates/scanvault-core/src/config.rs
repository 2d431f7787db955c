//! Store configuration.
//!
//! Deserialised by the binary from a TOML file layered with environment
//! variables; constructed directly in tests.

use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

pub const DEFAULT_RETENTION_DAYS: u32 = 30;
pub const MIN_RETENTION_DAYS: u32 = 1;
pub const MAX_RETENTION_DAYS: u32 = 365;
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;
pub const DEFAULT_CLEANUP_BATCH_SIZE: usize = 100;

/// Recognised store options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct StoreConfig {
  /// Records older than this many days are removed by cleanup passes.
  pub retention_days:      u32,
  /// Period of the background cleanup timer.
  pub cleanup_interval_ms: u64,
  /// Upper bound on deletions per cleanup pass.
  pub cleanup_batch_size:  usize,
  /// Record count above which a write triggers an immediate cleanup.
  pub max_records:         Option<u64>,
  /// Estimated size above which a write triggers an immediate cleanup.
  pub max_storage_bytes:   Option<u64>,
  pub encryption_enabled:  bool,
  /// Run the crypto self-test while opening the store.
  pub self_test_on_open:   bool,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      retention_days:      DEFAULT_RETENTION_DAYS,
      cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
      cleanup_batch_size:  DEFAULT_CLEANUP_BATCH_SIZE,
      max_records:         None,
      max_storage_bytes:   None,
      encryption_enabled:  true,
      self_test_on_open:   true,
    }
  }
}

impl StoreConfig {
  /// Check every option against its documented bounds.
  pub fn validate(&self) -> Result<()> {
    if !(MIN_RETENTION_DAYS..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
      return Err(Error::InvalidConfig(format!(
        "retention_days must be within {MIN_RETENTION_DAYS}..={MAX_RETENTION_DAYS}, got {}",
        self.retention_days
      )));
    }
    if self.cleanup_interval_ms == 0 {
      return Err(Error::InvalidConfig("cleanup_interval_ms must be positive".into()));
    }
    if self.cleanup_batch_size == 0 {
      return Err(Error::InvalidConfig("cleanup_batch_size must be positive".into()));
    }
    if self.max_records == Some(0) {
      return Err(Error::InvalidConfig("max_records must be positive when set".into()));
    }
    if self.max_storage_bytes == Some(0) {
      return Err(Error::InvalidConfig(
        "max_storage_bytes must be positive when set".into(),
      ));
    }
    Ok(())
  }

  pub fn cleanup_interval(&self) -> Duration {
    Duration::from_millis(self.cleanup_interval_ms)
  }

  /// Whether `count` records totalling `bytes` exceed a configured quota.
  pub fn over_quota(&self, count: u64, bytes: u64) -> bool {
    self.max_records.is_some_and(|max| count > max)
      || self.max_storage_bytes.is_some_and(|max| bytes > max)
  }
}
