//! Bounded, append-only trail of privacy-relevant actions.
//!
//! The log lives in memory only. It is a ring: once [`AUDIT_CAPACITY`]
//! entries are held, every append drops the oldest entry.

use std::{
  collections::VecDeque,
  fmt,
  str::FromStr,
  sync::{Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};

use crate::{Error, record::now_millis};

/// Maximum number of entries retained.
pub const AUDIT_CAPACITY: usize = 1000;

/// Number of entries exposed by [`AuditLog::compliance_view`].
pub const COMPLIANCE_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
  Created,
  Accessed,
  Deleted,
  Exported,
  Anonymized,
}

impl AuditAction {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Created => "created",
      Self::Accessed => "accessed",
      Self::Deleted => "deleted",
      Self::Exported => "exported",
      Self::Anonymized => "anonymized",
    }
  }
}

impl fmt::Display for AuditAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for AuditAction {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "created" => Ok(Self::Created),
      "accessed" => Ok(Self::Accessed),
      "deleted" => Ok(Self::Deleted),
      "exported" => Ok(Self::Exported),
      "anonymized" => Ok(Self::Anonymized),
      other => Err(Error::UnknownAction(other.to_owned())),
    }
  }
}

/// One immutable audit line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
  pub timestamp: i64,
  pub action:    AuditAction,
  pub record_id: Option<String>,
  pub details:   String,
}

/// Thread-safe bounded audit log.
#[derive(Debug)]
pub struct AuditLog {
  entries:  Mutex<VecDeque<AuditEntry>>,
  capacity: usize,
}

impl Default for AuditLog {
  fn default() -> Self { Self::with_capacity(AUDIT_CAPACITY) }
}

impl AuditLog {
  pub fn new() -> Self { Self::default() }

  /// A log with a custom bound. A zero capacity is bumped to one.
  pub fn with_capacity(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self { entries: Mutex::new(VecDeque::with_capacity(capacity)), capacity }
  }

  /// Append an entry, evicting the oldest entries beyond the bound.
  pub fn record(
    &self,
    action: AuditAction,
    record_id: Option<&str>,
    details: impl Into<String>,
  ) {
    let entry = AuditEntry {
      timestamp: now_millis(),
      action,
      record_id: record_id.map(str::to_owned),
      details: details.into(),
    };
    tracing::trace!(action = %entry.action, record_id = ?entry.record_id, "audit");

    let mut entries = self.lock();
    entries.push_back(entry);
    while entries.len() > self.capacity {
      entries.pop_front();
    }
  }

  /// The last `n` entries, oldest of the window first.
  pub fn recent(&self, n: usize) -> Vec<AuditEntry> {
    let entries = self.lock();
    let skip = entries.len().saturating_sub(n);
    entries.iter().skip(skip).cloned().collect()
  }

  /// The window of entries exposed to compliance reporting.
  pub fn compliance_view(&self) -> Vec<AuditEntry> { self.recent(COMPLIANCE_WINDOW) }

  pub fn reset(&self) { self.lock().clear(); }

  pub fn len(&self) -> usize { self.lock().len() }

  pub fn is_empty(&self) -> bool { self.lock().is_empty() }

  fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<AuditEntry>> {
    // The queue is always left consistent, so a poisoned lock is still usable.
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }
}
