//! Schema migration audit types.
//!
//! The scripts themselves are backend-specific and live with the backend;
//! these are the records a backend keeps about what it has applied.

use serde::{Deserialize, Serialize};

/// One successfully applied migration. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
  /// The version reached by this migration.
  pub version:     u32,
  pub description: String,
  pub applied_at:  i64,
  /// Digest of the migration's identifying fields.
  pub checksum:    String,
}

/// Summary of one migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOutcome {
  pub success:      bool,
  pub from_version: u32,
  /// The version actually reached, which is short of the target on failure.
  pub to_version:   u32,
  /// Descriptions of the migrations applied during this run, in order.
  pub applied:      Vec<String>,
  pub error:        Option<String>,
}

impl MigrationOutcome {
  pub fn up_to_date(version: u32) -> Self {
    Self {
      success:      true,
      from_version: version,
      to_version:   version,
      applied:      Vec::new(),
      error:        None,
    }
  }
}
