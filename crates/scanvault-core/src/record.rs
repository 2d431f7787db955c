//! Record types — the unit of persistence in the scanvault store.
//!
//! A record carries a JSON payload that is sealed (encrypted) at rest, plus a
//! small set of classification scalars that stay in the clear so the store
//! can answer indexed queries without decrypting anything.

use std::{fmt, str::FromStr};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

/// Milliseconds in one day; retention windows are expressed in days.
pub const DAY_MS: i64 = 86_400_000;

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 { Utc::now().timestamp_millis() }

/// The retention boundary for `retention_days`, relative to `now`.
/// Records created strictly before the cutoff are eligible for deletion.
pub fn retention_cutoff(now: i64, retention_days: u32) -> i64 {
  now - i64::from(retention_days) * DAY_MS
}

// ─── Entity type ─────────────────────────────────────────────────────────────

/// The logical kind of a record. Ids are unique within an entity type.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
  ScanResult,
  Setting,
}

impl EntityType {
  pub const ALL: [EntityType; 2] = [EntityType::ScanResult, EntityType::Setting];

  /// The discriminant stored in the `entity_type` column.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::ScanResult => "scan_result",
      Self::Setting => "setting",
    }
  }
}

impl fmt::Display for EntityType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for EntityType {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "scan_result" => Ok(Self::ScanResult),
      "setting" => Ok(Self::Setting),
      other => Err(Error::UnknownEntityType(other.to_owned())),
    }
  }
}

// ─── Classification ──────────────────────────────────────────────────────────

/// Plain indexable scalars extracted from a payload.
///
/// These are never encrypted. Keep them coarse: a risk bucket, a category
/// name, a geography bucket — nothing that identifies the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
  pub risk_level: Option<String>,
  pub category:   Option<String>,
  /// Geography bucket, e.g. a country or region code.
  pub region:     Option<String>,
}

impl Classification {
  pub fn risk(mut self, level: impl Into<String>) -> Self {
    self.risk_level = Some(level.into());
    self
  }

  pub fn category(mut self, category: impl Into<String>) -> Self {
    self.category = Some(category.into());
    self
  }

  pub fn region(mut self, region: impl Into<String>) -> Self {
    self.region = Some(region.into());
    self
  }
}

// ─── NewRecord ───────────────────────────────────────────────────────────────

/// Input to [`crate::store::RecordStore::put`].
///
/// `timestamp` defaults to the time of the write. It is only set explicitly
/// when importing or backfilling historical data.
#[derive(Debug, Clone)]
pub struct NewRecord {
  pub entity_type:    EntityType,
  pub id:             String,
  pub payload:        serde_json::Value,
  pub classification: Classification,
  pub timestamp:      Option<i64>,
}

impl NewRecord {
  /// A record with a caller-chosen id and no classification.
  pub fn new(
    entity_type: EntityType,
    id: impl Into<String>,
    payload: serde_json::Value,
  ) -> Self {
    Self {
      entity_type,
      id: id.into(),
      payload,
      classification: Classification::default(),
      timestamp: None,
    }
  }

  /// A record with a freshly generated UUID v4 id.
  pub fn with_generated_id(
    entity_type: EntityType,
    payload: serde_json::Value,
  ) -> Self {
    Self::new(entity_type, Uuid::new_v4().to_string(), payload)
  }

  pub fn classified(mut self, classification: Classification) -> Self {
    self.classification = classification;
    self
  }

  pub fn at(mut self, timestamp: i64) -> Self {
    self.timestamp = Some(timestamp);
    self
  }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// Metadata of a persisted record. The payload itself is only ever handed
/// out decrypted and verified, inside a [`ResolvedRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
  pub entity_type:      EntityType,
  pub id:               String,
  /// Creation time in epoch milliseconds; never changes after creation.
  pub timestamp:        i64,
  pub classification:   Classification,
  pub encrypted:        bool,
  /// SHA-256 hex digest of the canonical JSON payload.
  pub integrity_hash:   String,
  pub schema_version:   u32,
  /// Always `>= timestamp`.
  pub retention_expiry: i64,
}

/// A record bundled with its decrypted, hash-verified payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRecord {
  pub record: Record,
  pub value:  serde_json::Value,
}

// ─── Derived views ───────────────────────────────────────────────────────────

/// Storage statistics, recomputed on demand and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
  pub total_records:   u64,
  pub scan_results:    u64,
  pub settings:        u64,
  /// Sum of the stored column lengths; an estimate, not the file size.
  pub estimated_bytes: u64,
  pub oldest:          Option<i64>,
  pub newest:          Option<i64>,
}

/// Result of a retention compliance check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionStatus {
  pub retention_days:   u32,
  pub cutoff:           i64,
  /// Records created before `cutoff` that are still stored.
  pub expired_records:  u64,
  pub oldest_timestamp: Option<i64>,
}

impl RetentionStatus {
  pub fn is_compliant(&self) -> bool { self.expired_records == 0 }
}
