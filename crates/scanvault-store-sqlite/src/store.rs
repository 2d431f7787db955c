//! [`SqliteStore`] — the SQLite implementation of [`RecordStore`].

use std::{
  fmt,
  path::Path,
  sync::{Arc, Mutex, PoisonError, atomic::AtomicBool},
};

use rusqlite::{OptionalExtension as _, types::Value as SqlValue};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use scanvault_core::{
  audit::{AuditAction, AuditEntry, AuditLog},
  config::StoreConfig,
  event::{ChangeEvent, ChangeKind, EventBus, Subscription},
  migration::{MigrationOutcome, MigrationRecord},
  record::{
    DAY_MS, EntityType, NewRecord, Record, ResolvedRecord, RetentionStatus, StorageStats,
    now_millis,
  },
  store::{RecordQuery, RecordStore},
};
use scanvault_crypto::{EncryptedPayload, EncryptionEngine, KdfParams, WrappedKey};

use crate::{
  Error, Result,
  encode::{
    RECORD_COLUMNS, RawRecord, SealedPayload, encode_index_key, index_column, keyset_operator,
    order_keyword, sort_expression,
  },
  migrate::{self, MigrationEngine},
  schema::{KEY_CHECK_KEY, SCHEMA_VERSION, WRAPPED_KEY_KEY},
};

/// Rows fetched per round trip while streaming a query.
const QUERY_PAGE: usize = 64;

/// Plaintext sealed into the key check value.
const KEY_CANARY: &str = "scanvault key check";

// ─── Key source ──────────────────────────────────────────────────────────────

/// Where the store's master key comes from.
pub enum KeySource {
  /// A fresh random key. Encrypted records become unreadable once the store
  /// is dropped; meant for tests and scratch stores.
  Ephemeral,
  /// Derived deterministically from a high-entropy, device-bound seed.
  Seed(Vec<u8>),
  /// A random data key persisted in the database, wrapped under a key
  /// derived from `passphrase`.
  Passphrase { passphrase: String, kdf: KdfParams },
}

impl KeySource {
  /// A passphrase source with the default Argon2id cost.
  pub fn passphrase(passphrase: impl Into<String>) -> Self {
    Self::Passphrase { passphrase: passphrase.into(), kdf: KdfParams::default() }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      Self::Ephemeral => "ephemeral",
      Self::Seed(_) => "seed",
      Self::Passphrase { .. } => "passphrase",
    }
  }
}

/// Which key a database was first sealed under. A wrong key cannot open the
/// canary, so it is refused before any record is touched.
#[derive(Debug, Serialize, Deserialize)]
struct KeyCheck {
  source: String,
  canary: EncryptedPayload,
}

/// Key material persisted in `metadata`.
#[derive(Debug, Default)]
struct StoredKeys {
  wrapped:   Option<String>,
  key_check: Option<String>,
}

impl fmt::Debug for KeySource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Ephemeral => f.write_str("Ephemeral"),
      Self::Seed(_) => f.write_str("Seed(..)"),
      Self::Passphrase { kdf, .. } => {
        f.debug_struct("Passphrase").field("kdf", kdf).finish_non_exhaustive()
      }
    }
  }
}

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
  Closed,
  Opening,
  Ready,
}

pub(crate) struct Inner {
  pub(crate) conn:            tokio_rusqlite::Connection,
  pub(crate) engine:          EncryptionEngine,
  pub(crate) config:          StoreConfig,
  pub(crate) events:          EventBus,
  pub(crate) audit:           AuditLog,
  pub(crate) cleanup_running: AtomicBool,
  state:                      Mutex<StoreState>,
  scheduler:                  Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
  fn drop(&mut self) {
    let scheduler = self.scheduler.get_mut().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = scheduler.take() {
      handle.abort();
    }
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// An encrypted record store backed by a single SQLite file.
///
/// Cloning is cheap — every clone shares the connection, key, event bus and
/// audit log. Nothing is process-global; independent stores can coexist.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) inner: Arc<Inner>,
}

impl fmt::Debug for SqliteStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SqliteStore")
      .field("state", &self.state())
      .field("config", &self.inner.config)
      .finish_non_exhaustive()
  }
}

impl SqliteStore {
  /// Open (or create) a store at `path`, migrate its schema, establish the
  /// key and arm the retention scheduler.
  pub async fn open(
    path: impl AsRef<Path>,
    config: StoreConfig,
    key: KeySource,
  ) -> Result<Self> {
    config.validate()?;
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::start(conn, config, key).await
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory(config: StoreConfig, key: KeySource) -> Result<Self> {
    config.validate()?;
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::start(conn, config, key).await
  }

  async fn start(
    conn: tokio_rusqlite::Connection,
    config: StoreConfig,
    key: KeySource,
  ) -> Result<Self> {
    let store = Self {
      inner: Arc::new(Inner {
        conn,
        engine: EncryptionEngine::new(),
        config,
        events: EventBus::new(),
        audit: AuditLog::new(),
        cleanup_running: AtomicBool::new(false),
        state: Mutex::new(StoreState::Opening),
        scheduler: Mutex::new(None),
      }),
    };

    if let Err(e) = store.bootstrap(key).await {
      tracing::error!(error = %e, "failed to open store");
      store.set_state(StoreState::Closed);
      if let Err(close) = store.inner.conn.clone().close().await {
        tracing::debug!(error = %close, "closing connection after failed open");
      }
      return Err(e);
    }

    store.set_state(StoreState::Ready);
    let handle = store.spawn_scheduler();
    *store.lock_scheduler() = Some(handle);
    tracing::info!(
      schema_version = SCHEMA_VERSION,
      encryption = store.inner.config.encryption_enabled,
      "store ready"
    );
    Ok(store)
  }

  async fn bootstrap(&self, key: KeySource) -> Result<()> {
    let (outcome, stored) = self.inner.conn.call(|conn| Ok(prepare_schema(conn))).await??;
    if !outcome.success {
      return Err(Error::MigrationFailed {
        version: outcome.to_version + 1,
        reason:  outcome.error.unwrap_or_else(|| "unknown failure".into()),
      });
    }
    if !outcome.applied.is_empty() {
      tracing::info!(
        from = outcome.from_version,
        to = outcome.to_version,
        "schema migrated"
      );
    }

    self.establish_key(key, stored).await?;

    if self.inner.config.self_test_on_open && !self.inner.engine.self_test() {
      return Err(Error::Initialization("crypto self-test failed".into()));
    }
    Ok(())
  }

  async fn establish_key(&self, key: KeySource, stored: StoredKeys) -> Result<()> {
    let engine = &self.inner.engine;
    let source = key.kind();
    match key {
      KeySource::Ephemeral => engine.initialize(None)?,
      KeySource::Seed(seed) => engine.initialize(Some(seed.as_slice()))?,
      KeySource::Passphrase { passphrase, kdf } => {
        let existing = stored
          .wrapped
          .map(|json| serde_json::from_str::<WrappedKey>(&json))
          .transpose()?;
        let wrapped = engine
          .initialize_wrapped(passphrase.as_bytes(), existing.as_ref(), kdf)
          .map_err(|e| Error::Initialization(format!("cannot unlock data key: {e}")))?;

        if existing.is_none() {
          let json = serde_json::to_string(&wrapped)?;
          self
            .inner
            .conn
            .call(move |conn| {
              conn.execute(
                "INSERT INTO metadata (key, value) VALUES (?1, ?2)",
                rusqlite::params![WRAPPED_KEY_KEY, json],
              )?;
              Ok(())
            })
            .await?;
          tracing::info!("generated and stored a new wrapped data key");
        }
      }
    }
    self.check_key(source, stored.key_check).await
  }

  /// Compare the installed key against the stored key check, or record one
  /// if the database has none yet.
  async fn check_key(&self, source: &'static str, stored: Option<String>) -> Result<()> {
    let engine = &self.inner.engine;
    let Some(json) = stored else {
      let check = KeyCheck { source: source.to_owned(), canary: engine.encrypt(KEY_CANARY)? };
      let json = serde_json::to_string(&check)?;
      self
        .inner
        .conn
        .call(move |conn| {
          conn.execute(
            "INSERT INTO metadata (key, value) VALUES (?1, ?2)",
            rusqlite::params![KEY_CHECK_KEY, json],
          )?;
          Ok(())
        })
        .await?;
      tracing::debug!(source, "stored key check");
      return Ok(());
    };

    let check: KeyCheck = serde_json::from_str(&json)?;
    if check.source != source {
      return Err(Error::Initialization(format!(
        "database is keyed by a {} source, not {source}",
        check.source
      )));
    }
    match engine.decrypt::<String>(&check.canary) {
      Ok(canary) if canary == KEY_CANARY => Ok(()),
      _ => Err(Error::Initialization("key does not match this database".into())),
    }
  }

  // ── Lifecycle ─────────────────────────────────────────────────────────

  pub fn state(&self) -> StoreState {
    *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_state(&self, state: StoreState) {
    *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
  }

  pub(crate) fn lock_scheduler(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
    self.inner.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn config(&self) -> &StoreConfig { &self.inner.config }

  /// Stop the scheduler and close the connection. Every later operation
  /// fails with [`Error::NotInitialized`]. Disposing twice is a no-op.
  pub async fn dispose(&self) -> Result<()> {
    {
      let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
      if *state == StoreState::Closed {
        return Ok(());
      }
      *state = StoreState::Closed;
    }
    if let Some(handle) = self.lock_scheduler().take() {
      handle.abort();
    }
    self.inner.conn.clone().close().await?;
    tracing::info!("store disposed");
    Ok(())
  }

  pub(crate) fn ensure_ready(&self) -> Result<()> {
    match self.state() {
      StoreState::Ready => Ok(()),
      StoreState::Closed | StoreState::Opening => Err(Error::NotInitialized),
    }
  }

  /// Publish an `error` change event for a failed operation, then hand the
  /// result back unchanged.
  pub(crate) fn report<T>(&self, entity_type: Option<EntityType>, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
      self.inner.events.publish(&ChangeEvent::failure(entity_type, e));
    }
    result
  }

  pub(crate) fn publish(&self, event: ChangeEvent) { self.inner.events.publish(&event); }

  // ── Introspection ─────────────────────────────────────────────────────

  pub async fn schema_version(&self) -> Result<u32> {
    self.ensure_ready()?;
    self.inner.conn.call(|conn| Ok(migrate::current_version(conn))).await?
  }

  /// Applied migrations, ascending by version.
  pub async fn migration_history(&self) -> Result<Vec<MigrationRecord>> {
    let result = self.read_history().await;
    self.report(None, result)
  }

  async fn read_history(&self) -> Result<Vec<MigrationRecord>> {
    self.ensure_ready()?;
    self.inner.conn.call(|conn| Ok(migrate::history(conn))).await?
  }

  /// The most recent audit entries exposed for compliance reporting.
  pub fn compliance_audit(&self) -> Result<Vec<AuditEntry>> {
    self.ensure_ready()?;
    Ok(self.inner.audit.compliance_view())
  }

  /// Run the encryption engine's self-test against the live key.
  pub fn self_test(&self) -> Result<bool> {
    self.ensure_ready()?;
    Ok(self.inner.engine.self_test())
  }

  // ── Record codec ──────────────────────────────────────────────────────

  fn seal(&self, input: NewRecord) -> Result<RawRecord> {
    let engine = &self.inner.engine;
    let config = &self.inner.config;

    let integrity_hash = engine.hash(&input.payload)?;
    let payload = if config.encryption_enabled {
      SealedPayload::Encrypted(engine.encrypt(&input.payload)?)
    } else {
      // `Value` objects are key-sorted, so this is the canonical form.
      SealedPayload::Plain(serde_json::to_string(&input.payload)?)
    };

    let timestamp = input.timestamp.unwrap_or_else(now_millis);
    let retention_expiry =
      timestamp.saturating_add(i64::from(config.retention_days) * DAY_MS);

    Ok(RawRecord::seal(
      input.entity_type,
      input.id,
      timestamp,
      input.classification,
      payload,
      integrity_hash,
      SCHEMA_VERSION,
      retention_expiry,
    ))
  }

  /// Open and verify a stored row.
  fn resolve(&self, raw: RawRecord) -> Result<ResolvedRecord> {
    let (record, payload) = raw.into_parts()?;
    let corrupt = |reason: String| Error::CorruptRecord { id: record.id.clone(), reason };

    let value: serde_json::Value = match payload {
      SealedPayload::Encrypted(sealed) => {
        self.inner.engine.decrypt(&sealed).map_err(|e| corrupt(e.to_string()))?
      }
      SealedPayload::Plain(json) => {
        serde_json::from_str(&json).map_err(|e| corrupt(e.to_string()))?
      }
    };

    if !self.inner.engine.verify_hash(&value, &record.integrity_hash)? {
      return Err(corrupt("integrity hash mismatch".into()));
    }
    Ok(ResolvedRecord { record, value })
  }

  // ── Operations ────────────────────────────────────────────────────────

  async fn write_record(&self, input: NewRecord) -> Result<Record> {
    self.ensure_ready()?;
    let entity_type = input.entity_type;

    // Seal before touching the database: no transaction is ever open while
    // crypto runs.
    let row = self.seal(input)?;

    let (stored, replaced) = self
      .inner
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let replaced: bool = tx.query_row(
          "SELECT EXISTS(SELECT 1 FROM records WHERE entity_type = ?1 AND id = ?2)",
          rusqlite::params![row.entity_type, row.id],
          |r| r.get(0),
        )?;
        tx.execute(
          "INSERT INTO records (
             entity_type, id, timestamp, risk_level, category, region,
             encrypted, cipher_payload, salt, iv, plain_payload,
             integrity_hash, schema_version, retention_expiry
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
           ON CONFLICT(entity_type, id) DO UPDATE SET
             risk_level     = excluded.risk_level,
             category       = excluded.category,
             region         = excluded.region,
             encrypted      = excluded.encrypted,
             cipher_payload = excluded.cipher_payload,
             salt           = excluded.salt,
             iv             = excluded.iv,
             plain_payload  = excluded.plain_payload,
             integrity_hash = excluded.integrity_hash,
             schema_version = excluded.schema_version",
          rusqlite::params![
            row.entity_type,
            row.id,
            row.timestamp,
            row.risk_level,
            row.category,
            row.region,
            row.encrypted,
            row.cipher_payload,
            row.salt,
            row.iv,
            row.plain_payload,
            row.integrity_hash,
            row.schema_version,
            row.retention_expiry,
          ],
        )?;
        let stored = tx.query_row(
          &format!("SELECT {RECORD_COLUMNS} FROM records WHERE entity_type = ?1 AND id = ?2"),
          rusqlite::params![row.entity_type, row.id],
          RawRecord::from_row,
        )?;
        tx.commit()?;
        Ok((stored, replaced))
      })
      .await
      .map_err(Error::SaveFailed)?;

    let (record, _) = stored.into_parts()?;
    tracing::debug!(entity_type = %entity_type, id = %record.id, replaced, "record written");

    self.publish(ChangeEvent::new(ChangeKind::Write, Some(entity_type)).with_count(1));
    let verb = if replaced { "replaced" } else { "created" };
    self.inner.audit.record(
      AuditAction::Created,
      Some(&record.id),
      format!("{verb} {entity_type} record"),
    );

    // A failed quota pass must not fail the write that triggered it.
    if let Err(e) = self.enforce_quota(entity_type, &record.id).await {
      tracing::warn!(error = %e, "quota cleanup failed");
      self.publish(ChangeEvent::failure(None, &e));
    }

    Ok(record)
  }

  async fn read_record(&self, entity_type: EntityType, id: &str) -> Result<Option<ResolvedRecord>> {
    self.ensure_ready()?;
    let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE entity_type = ?1 AND id = ?2");
    let id_owned = id.to_owned();

    let raw = self
      .inner
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(&sql, rusqlite::params![entity_type.as_str(), id_owned], RawRecord::from_row)
            .optional()?,
        )
      })
      .await
      .map_err(Error::ReadFailed)?;

    let Some(raw) = raw else {
      return Ok(None);
    };
    let resolved = self.resolve(raw)?;
    self.inner.audit.record(
      AuditAction::Accessed,
      Some(id),
      format!("read {entity_type} record"),
    );
    Ok(Some(resolved))
  }

  async fn run_query(&self, query: &RecordQuery) -> Result<Vec<ResolvedRecord>> {
    self.ensure_ready()?;
    if query.limit == Some(0) {
      return Ok(Vec::new());
    }

    let sort = sort_expression(query.index);
    let order = order_keyword(query.order);
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    if let Some(entity_type) = query.entity_type {
      params.push(SqlValue::Text(entity_type.as_str().to_owned()));
      clauses.push(format!("entity_type = ?{}", params.len()));
    }
    if let Some(key) = &query.key {
      params.push(encode_index_key(key));
      clauses.push(format!("{} = ?{}", index_column(query.index), params.len()));
    }

    // Later pages resume strictly after the last row seen.
    let n = params.len();
    let first_sql = page_sql(&clauses, sort, order, n + 1);
    let mut resumed = clauses.clone();
    resumed.push(format!(
      "({sort}, timestamp, entity_type, id) {} (?{}, ?{}, ?{}, ?{})",
      keyset_operator(query.order),
      n + 1,
      n + 2,
      n + 3,
      n + 4,
    ));
    let next_sql = page_sql(&resumed, sort, order, n + 5);

    let mut results = Vec::new();
    let mut skipped = 0usize;
    let mut after: Option<[SqlValue; 4]> = None;

    loop {
      let page = match &after {
        None => self.fetch_page(&first_sql, params.clone()).await?,
        Some(cursor) => {
          let mut page_params = params.clone();
          page_params.extend(cursor.iter().cloned());
          self.fetch_page(&next_sql, page_params).await?
        }
      };
      let fetched = page.len();
      if let Some(last) = page.last() {
        after = Some(last.keyset(query.index));
      }

      for raw in page {
        if let Some(filter) = &query.filter {
          if !filter.matches(&raw.classification()) {
            continue;
          }
        }
        if skipped < query.offset {
          skipped += 1;
          continue;
        }

        let id = raw.id.clone();
        let entity_type = raw.entity_type.parse::<EntityType>().ok();
        match self.resolve(raw) {
          Ok(resolved) => {
            results.push(resolved);
            if query.limit.is_some_and(|limit| results.len() >= limit) {
              return Ok(results);
            }
          }
          Err(e) => {
            tracing::warn!(id = %id, error = %e, "skipping unreadable record");
            self.publish(ChangeEvent::failure(entity_type, &e));
          }
        }
      }

      if fetched < QUERY_PAGE {
        return Ok(results);
      }
    }
  }

  /// Fetch one page; `params` must already bind every placeholder except
  /// the trailing `LIMIT`.
  async fn fetch_page(&self, sql: &str, mut params: Vec<SqlValue>) -> Result<Vec<RawRecord>> {
    let sql = sql.to_owned();
    params.push(SqlValue::Integer(to_i64(QUERY_PAGE)));

    self
      .inner
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawRecord::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .map_err(Error::ReadFailed)
  }

  async fn delete_record(&self, entity_type: EntityType, id: &str) -> Result<bool> {
    self.ensure_ready()?;
    let id_owned = id.to_owned();
    let removed = self
      .inner
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM records WHERE entity_type = ?1 AND id = ?2",
          rusqlite::params![entity_type.as_str(), id_owned],
        )?)
      })
      .await
      .map_err(Error::DeleteFailed)?;

    if removed == 0 {
      return Ok(false);
    }
    self.publish(ChangeEvent::new(ChangeKind::Delete, Some(entity_type)).with_count(1));
    self.inner.audit.record(
      AuditAction::Deleted,
      Some(id),
      format!("deleted {entity_type} record"),
    );
    Ok(true)
  }

  async fn delete_where(&self, entity_type: Option<EntityType>) -> Result<u64> {
    self.ensure_ready()?;
    let removed = self
      .inner
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let removed = match entity_type {
          Some(kind) => tx.execute(
            "DELETE FROM records WHERE entity_type = ?1",
            rusqlite::params![kind.as_str()],
          )?,
          None => tx.execute("DELETE FROM records", [])?,
        };
        tx.commit()?;
        Ok(removed)
      })
      .await
      .map_err(Error::DeleteFailed)?;
    let removed = removed as u64;

    self.publish(ChangeEvent::new(ChangeKind::Clear, entity_type).with_count(removed));
    Ok(removed)
  }

  async fn compute_stats(&self) -> Result<StorageStats> {
    self.ensure_ready()?;
    self
      .inner
      .conn
      .call(|conn| Ok(stats_in(conn)?))
      .await
      .map_err(Error::ReadFailed)
  }
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
  type Error = Error;

  async fn put(&self, input: NewRecord) -> Result<Record> {
    let entity_type = input.entity_type;
    let result = self.write_record(input).await;
    self.report(Some(entity_type), result)
  }

  async fn delete(&self, entity_type: EntityType, id: &str) -> Result<bool> {
    let result = self.delete_record(entity_type, id).await;
    self.report(Some(entity_type), result)
  }

  async fn clear(&self, entity_type: EntityType) -> Result<u64> {
    let result = self.delete_where(Some(entity_type)).await;
    if let Ok(removed) = &result {
      self.inner.audit.record(
        AuditAction::Deleted,
        None,
        format!("cleared {removed} {entity_type} records"),
      );
    }
    self.report(Some(entity_type), result)
  }

  async fn clear_all(&self) -> Result<u64> {
    let result = self.delete_where(None).await;
    if let Ok(removed) = &result {
      self.inner.audit.reset();
      tracing::info!(removed, "all records cleared and audit trail reset");
    }
    self.report(None, result)
  }

  async fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<ResolvedRecord>> {
    let result = self.read_record(entity_type, id).await;
    self.report(Some(entity_type), result)
  }

  async fn query(&self, query: &RecordQuery) -> Result<Vec<ResolvedRecord>> {
    let result = self.run_query(query).await;
    self.report(query.entity_type, result)
  }

  async fn stats(&self) -> Result<StorageStats> {
    let result = self.compute_stats().await;
    self.report(None, result)
  }

  async fn run_cleanup(&self, retention_days: u32) -> Result<u64> {
    let result = self.cleanup_for(retention_days).await;
    self.report(None, result)
  }

  async fn retention_status(&self) -> Result<RetentionStatus> {
    let result = self.compute_retention_status().await;
    self.report(None, result)
  }

  fn subscribe(
    &self,
    listener: Box<dyn Fn(&ChangeEvent) + Send + Sync>,
  ) -> Result<Subscription> {
    self.ensure_ready()?;
    Ok(self.inner.events.subscribe(listener))
  }

  fn append_audit(&self, action: AuditAction, record_id: Option<&str>, details: &str) -> Result<()> {
    self.ensure_ready()?;
    self.inner.audit.record(action, record_id, details);
    Ok(())
  }

  fn recent_audit(&self, n: usize) -> Result<Vec<AuditEntry>> {
    self.ensure_ready()?;
    Ok(self.inner.audit.recent(n))
  }
}

// ─── Connection-thread helpers ───────────────────────────────────────────────

/// Runs on the connection thread while the store is opening: migrate,
/// verify, then read the persisted key material (if any).
fn prepare_schema(conn: &mut rusqlite::Connection) -> Result<(MigrationOutcome, StoredKeys)> {
  conn.busy_timeout(std::time::Duration::from_secs(5))?;
  let mode: String =
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
  tracing::debug!(journal_mode = %mode, "connection configured");

  let engine = MigrationEngine::builtin();
  let outcome = engine.run_migrations(conn)?;
  if !outcome.success {
    return Ok((outcome, StoredKeys::default()));
  }
  engine.verify_history(conn)?;
  migrate::validate_integrity(conn)?;

  let read = |key: &str| {
    conn
      .query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        rusqlite::params![key],
        |row| row.get::<_, String>(0),
      )
      .optional()
  };
  let stored = StoredKeys { wrapped: read(WRAPPED_KEY_KEY)?, key_check: read(KEY_CHECK_KEY)? };
  Ok((outcome, stored))
}

/// `SELECT` for one query page, ordered by the keyset and limited by the
/// placeholder numbered `limit_param`.
fn page_sql(clauses: &[String], sort: &str, order: &str, limit_param: usize) -> String {
  let where_clause = if clauses.is_empty() {
    String::new()
  } else {
    format!("WHERE {}", clauses.join(" AND "))
  };
  format!(
    "SELECT {RECORD_COLUMNS} FROM records {where_clause}
     ORDER BY {sort} {order}, timestamp {order}, entity_type {order}, id {order}
     LIMIT ?{limit_param}"
  )
}

/// Aggregate statistics in one pass over `records`.
pub(crate) fn stats_in(conn: &rusqlite::Connection) -> rusqlite::Result<StorageStats> {
  conn.query_row(
    "SELECT
       COUNT(*),
       COALESCE(SUM(entity_type = 'scan_result'), 0),
       COALESCE(SUM(entity_type = 'setting'), 0),
       COALESCE(SUM(
         LENGTH(entity_type) + LENGTH(id) + LENGTH(integrity_hash)
         + COALESCE(LENGTH(cipher_payload), 0) + COALESCE(LENGTH(salt), 0)
         + COALESCE(LENGTH(iv), 0) + COALESCE(LENGTH(plain_payload), 0)
       ), 0),
       MIN(timestamp),
       MAX(timestamp)
     FROM records",
    [],
    |row| {
      Ok(StorageStats {
        total_records:   row.get(0)?,
        scan_results:    row.get(1)?,
        settings:        row.get(2)?,
        estimated_bytes: row.get(3)?,
        oldest:          row.get(4)?,
        newest:          row.get(5)?,
      })
    },
  )
}

pub(crate) fn to_i64(n: usize) -> i64 { i64::try_from(n).unwrap_or(i64::MAX) }
