//! Retention enforcement: age-based cleanup, quota eviction and the
//! background scheduler.
//!
//! Every pass deletes oldest-first and at most `cleanup_batch_size` records,
//! inside a single transaction. Passes are mutually exclusive: a trigger that
//! arrives while another pass holds the in-progress flag returns 0 at once.

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use tokio::{
  task::JoinHandle,
  time::{MissedTickBehavior, interval},
};

use scanvault_core::{
  audit::AuditAction,
  config::StoreConfig,
  event::{ChangeEvent, ChangeKind},
  record::{EntityType, RetentionStatus, now_millis, retention_cutoff},
};

use crate::{
  Error, Result,
  store::{SqliteStore, StoreState, stats_in, to_i64},
};

// ─── Guard ───────────────────────────────────────────────────────────────────

/// Holds the in-progress flag for the lifetime of one pass.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for PassGuard<'_> {
  fn drop(&mut self) { self.0.store(false, Ordering::Release); }
}

// ─── SQL ─────────────────────────────────────────────────────────────────────

/// Delete up to `limit` records created before `cutoff`, oldest first.
fn delete_expired(conn: &rusqlite::Connection, cutoff: i64, limit: usize) -> rusqlite::Result<u64> {
  let removed = conn.execute(
    "DELETE FROM records WHERE rowid IN (
       SELECT rowid FROM records WHERE timestamp < ?1 ORDER BY timestamp ASC LIMIT ?2
     )",
    rusqlite::params![cutoff, to_i64(limit)],
  )?;
  Ok(removed as u64)
}

/// Delete the `limit` oldest records regardless of age, sparing `keep`.
fn delete_oldest(
  conn: &rusqlite::Connection,
  limit: u64,
  keep: (&str, &str),
) -> rusqlite::Result<u64> {
  let removed = conn.execute(
    "DELETE FROM records WHERE rowid IN (
       SELECT rowid FROM records
       WHERE NOT (entity_type = ?2 AND id = ?3)
       ORDER BY timestamp ASC LIMIT ?1
     )",
    rusqlite::params![i64::try_from(limit).unwrap_or(i64::MAX), keep.0, keep.1],
  )?;
  Ok(removed as u64)
}

/// One quota pass: expired records first, then the oldest records until the
/// store is back under quota or the batch budget is spent. The unexpired
/// record `keep` (the write that triggered the pass) is never evicted.
/// Returns `None` when the store was not over quota.
fn quota_pass(
  conn: &mut rusqlite::Connection,
  config: &StoreConfig,
  keep: (&str, &str),
) -> rusqlite::Result<Option<u64>> {
  let stats = stats_in(conn)?;
  if !config.over_quota(stats.total_records, stats.estimated_bytes) {
    return Ok(None);
  }

  let budget = config.cleanup_batch_size as u64;
  let tx = conn.transaction()?;
  let cutoff = retention_cutoff(now_millis(), config.retention_days);
  let mut removed = delete_expired(&tx, cutoff, config.cleanup_batch_size)?;

  while removed < budget {
    let stats = stats_in(&tx)?;
    if !config.over_quota(stats.total_records, stats.estimated_bytes) {
      break;
    }
    // Over the record cap the excess is known exactly; over the byte cap
    // evict one at a time and re-measure.
    let excess = config
      .max_records
      .map_or(0, |max| stats.total_records.saturating_sub(max))
      .max(1);
    let step = delete_oldest(&tx, excess.min(budget - removed), keep)?;
    if step == 0 {
      break;
    }
    removed += step;
  }

  tx.commit()?;
  Ok(Some(removed))
}

// ─── Passes ──────────────────────────────────────────────────────────────────

impl SqliteStore {
  /// Delete records older than `retention_days`, at most `batch_size` of
  /// them. Returns 0 without touching the database if another pass is
  /// already running.
  pub(crate) async fn cleanup(&self, retention_days: u32, batch_size: usize) -> Result<u64> {
    self.ensure_ready()?;
    let Some(_guard) = PassGuard::acquire(&self.inner.cleanup_running) else {
      tracing::debug!("cleanup already in progress; skipping");
      return Ok(0);
    };

    let cutoff = retention_cutoff(now_millis(), retention_days);
    let removed = self
      .inner
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let removed = delete_expired(&tx, cutoff, batch_size)?;
        tx.commit()?;
        Ok(removed)
      })
      .await
      .map_err(Error::DeleteFailed)?;

    self.publish(ChangeEvent::new(ChangeKind::Cleanup, None).with_count(removed));
    if removed > 0 {
      self.inner.audit.record(
        AuditAction::Deleted,
        None,
        format!("retention cleanup removed {removed} records older than {retention_days} days"),
      );
    }
    tracing::info!(removed, retention_days, "retention cleanup finished");
    Ok(removed)
  }

  /// [`Self::cleanup`] with an explicit retention window, which must lie
  /// within the configured bounds.
  pub(crate) async fn cleanup_for(&self, retention_days: u32) -> Result<u64> {
    StoreConfig { retention_days, ..self.inner.config.clone() }.validate()?;
    self.cleanup(retention_days, self.inner.config.cleanup_batch_size).await
  }

  /// Evict records if the store exceeds `max_records` or
  /// `max_storage_bytes`. Runs after every write of `(entity_type, id)`.
  pub(crate) async fn enforce_quota(&self, entity_type: EntityType, id: &str) -> Result<()> {
    let config = &self.inner.config;
    if config.max_records.is_none() && config.max_storage_bytes.is_none() {
      return Ok(());
    }
    let Some(_guard) = PassGuard::acquire(&self.inner.cleanup_running) else {
      tracing::debug!("cleanup already in progress; quota check deferred");
      return Ok(());
    };

    let pass_config = config.clone();
    let id = id.to_owned();
    let removed = self
      .inner
      .conn
      .call(move |conn| Ok(quota_pass(conn, &pass_config, (entity_type.as_str(), &id))?))
      .await
      .map_err(Error::DeleteFailed)?;

    if let Some(removed) = removed {
      self.publish(ChangeEvent::new(ChangeKind::Cleanup, None).with_count(removed));
      self.inner.audit.record(
        AuditAction::Deleted,
        None,
        format!("quota cleanup removed {removed} records"),
      );
      tracing::info!(removed, "quota cleanup finished");
    }
    Ok(())
  }

  pub(crate) async fn compute_retention_status(&self) -> Result<RetentionStatus> {
    self.ensure_ready()?;
    let retention_days = self.inner.config.retention_days;
    let cutoff = retention_cutoff(now_millis(), retention_days);

    let (expired_records, oldest_timestamp) = self
      .inner
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COALESCE(SUM(timestamp < ?1), 0), MIN(timestamp) FROM records",
          rusqlite::params![cutoff],
          |row| Ok((row.get::<_, u64>(0)?, row.get::<_, Option<i64>>(1)?)),
        )?)
      })
      .await
      .map_err(Error::ReadFailed)?;

    Ok(RetentionStatus { retention_days, cutoff, expired_records, oldest_timestamp })
  }

  // ── Scheduler ─────────────────────────────────────────────────────────

  /// Start the periodic cleanup task. The task holds only a weak reference
  /// and exits once the store is disposed or dropped.
  pub(crate) fn spawn_scheduler(&self) -> JoinHandle<()> {
    let weak = Arc::downgrade(&self.inner);
    let period = self.inner.config.cleanup_interval();
    let retention_days = self.inner.config.retention_days;
    let batch_size = self.inner.config.cleanup_batch_size;

    tokio::spawn(async move {
      let mut ticker = interval(period.max(Duration::from_millis(1)));
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // The first tick completes immediately.
      ticker.tick().await;

      loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
          break;
        };
        let store = SqliteStore { inner };
        if store.state() != StoreState::Ready {
          break;
        }
        if let Err(e) = store.cleanup(retention_days, batch_size).await {
          tracing::error!(error = %e, "scheduled cleanup failed; retrying next tick");
          store.publish(ChangeEvent::failure(None, &e));
        }
      }
      tracing::debug!("retention scheduler stopped");
    })
  }
}
