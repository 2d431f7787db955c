//! The `RecordStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g.
//! `scanvault-store-sqlite`). The lifecycle/compliance and settings layers
//! depend on this abstraction, not on any concrete backend.

use std::{fmt, future::Future, sync::Arc};

use crate::{
  audit::{AuditAction, AuditEntry},
  event::{ChangeEvent, Subscription},
  record::{
    Classification, EntityType, NewRecord, Record, ResolvedRecord, RetentionStatus,
    StorageStats,
  },
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// The index a query walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryIndex {
  #[default]
  Timestamp,
  RiskLevel,
  Category,
  Region,
  Encrypted,
}

/// A key to match exactly on the chosen index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKey {
  Text(String),
  Bool(bool),
  Timestamp(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
  #[default]
  Ascending,
  Descending,
}

/// An in-memory predicate over the plain classification fields.
#[derive(Clone)]
pub struct ClassificationFilter(Arc<dyn Fn(&Classification) -> bool + Send + Sync>);

impl ClassificationFilter {
  pub fn new<F>(predicate: F) -> Self
  where
    F: Fn(&Classification) -> bool + Send + Sync + 'static,
  {
    Self(Arc::new(predicate))
  }

  pub fn matches(&self, classification: &Classification) -> bool {
    (self.0)(classification)
  }
}

impl fmt::Debug for ClassificationFilter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("ClassificationFilter(..)")
  }
}

/// Parameters for [`RecordStore::query`].
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
  /// Restrict to one entity type; `None` walks every record.
  pub entity_type: Option<EntityType>,
  pub index:       QueryIndex,
  /// Exact match on `index`; `None` walks the whole index.
  pub key:         Option<IndexKey>,
  pub order:       Order,
  /// Applied before decryption, so rejected records are never opened.
  pub filter:      Option<ClassificationFilter>,
  pub limit:       Option<usize>,
  /// Number of filter-matching records to skip.
  pub offset:      usize,
}

impl RecordQuery {
  /// Every record of `entity_type`, oldest first.
  pub fn entity(entity_type: EntityType) -> Self {
    Self { entity_type: Some(entity_type), ..Default::default() }
  }

  pub fn by(mut self, index: QueryIndex, key: Option<IndexKey>) -> Self {
    self.index = index;
    self.key = key;
    self
  }

  pub fn descending(mut self) -> Self {
    self.order = Order::Descending;
    self
  }

  pub fn filter<F>(mut self, predicate: F) -> Self
  where
    F: Fn(&Classification) -> bool + Send + Sync + 'static,
  {
    self.filter = Some(ClassificationFilter::new(predicate));
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn offset(mut self, offset: usize) -> Self {
    self.offset = offset;
    self
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over an encrypted record store backend.
///
/// Every method fails with the backend's "not initialized" error once the
/// store has been disposed.
///
/// All async methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait RecordStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Seal and persist a record. Writing an existing id replaces its payload
  /// and classification (last write wins) but keeps its creation time.
  fn put(
    &self,
    input: NewRecord,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send + '_;

  /// Delete one record. Returns whether it existed.
  fn delete<'a>(
    &'a self,
    entity_type: EntityType,
    id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Delete every record of `entity_type`, regardless of retention.
  fn clear(
    &self,
    entity_type: EntityType,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Delete every record and reset the audit trail.
  fn clear_all(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Fetch and open one record. Returns `None` if not found.
  fn get<'a>(
    &'a self,
    entity_type: EntityType,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<ResolvedRecord>, Self::Error>> + Send + 'a;

  /// Stream records in index order. Records that fail to decrypt or verify
  /// are skipped rather than failing the query.
  fn query<'a>(
    &'a self,
    query: &'a RecordQuery,
  ) -> impl Future<Output = Result<Vec<ResolvedRecord>, Self::Error>> + Send + 'a;

  fn stats(&self) -> impl Future<Output = Result<StorageStats, Self::Error>> + Send + '_;

  // ── Retention ─────────────────────────────────────────────────────────

  /// Run one cleanup pass with the configured batch size. Returns the number
  /// of records deleted.
  fn run_cleanup(
    &self,
    retention_days: u32,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Report how many stored records are past the configured retention.
  fn retention_status(
    &self,
  ) -> impl Future<Output = Result<RetentionStatus, Self::Error>> + Send + '_;

  // ── Events and audit ──────────────────────────────────────────────────

  fn subscribe(
    &self,
    listener: Box<dyn Fn(&ChangeEvent) + Send + Sync>,
  ) -> Result<Subscription, Self::Error>;

  fn append_audit(
    &self,
    action: AuditAction,
    record_id: Option<&str>,
    details: &str,
  ) -> Result<(), Self::Error>;

  fn recent_audit(&self, n: usize) -> Result<Vec<AuditEntry>, Self::Error>;
}
