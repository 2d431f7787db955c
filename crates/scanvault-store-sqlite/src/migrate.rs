//! Versioned schema evolution.
//!
//! Scripts form a strict chain: from the current version the engine applies
//! the script whose `from_version` equals it, advances to that script's
//! `to_version`, and repeats until the target. All scripts of one run share
//! a single transaction; each script additionally runs inside its own
//! savepoint. A failing script is rolled back to its savepoint and the run
//! stops, but the scripts that already succeeded are committed: migrations
//! are forward-only and there is no down path.

use std::fmt;

use rusqlite::{Connection, OptionalExtension as _, Transaction};
use scanvault_core::{
  migration::{MigrationOutcome, MigrationRecord},
  record::now_millis,
};
use sha2::{Digest, Sha256};

use crate::{
  Error, Result,
  schema::{
    self, EXPECTED_INDEXES, EXPECTED_TABLES, METADATA_DDL, MIGRATION_KEY_PREFIX,
    VERSION_KEY,
  },
};

type ApplyFn = dyn Fn(&Connection) -> rusqlite::Result<()> + Send + Sync;

// ─── Script ──────────────────────────────────────────────────────────────────

/// One schema transformation step.
pub struct MigrationScript {
  pub from_version: u32,
  pub to_version:   u32,
  pub description:  String,
  apply:            Box<ApplyFn>,
}

impl fmt::Debug for MigrationScript {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MigrationScript")
      .field("from_version", &self.from_version)
      .field("to_version", &self.to_version)
      .field("description", &self.description)
      .finish_non_exhaustive()
  }
}

impl MigrationScript {
  pub fn new<F>(
    from_version: u32,
    to_version: u32,
    description: impl Into<String>,
    apply: F,
  ) -> Self
  where
    F: Fn(&Connection) -> rusqlite::Result<()> + Send + Sync + 'static,
  {
    Self {
      from_version,
      to_version,
      description: description.into(),
      apply: Box::new(apply),
    }
  }

  /// SHA-256 over the identifying fields; detects a recorded migration that
  /// no longer matches the script registered for its version.
  pub fn checksum(&self) -> String {
    let ident = format!("{}:{}:{}", self.from_version, self.to_version, self.description);
    hex::encode(Sha256::digest(ident.as_bytes()))
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MigrationEngine {
  scripts: Vec<MigrationScript>,
  target:  u32,
}

impl MigrationEngine {
  pub fn new(mut scripts: Vec<MigrationScript>, target: u32) -> Self {
    scripts.sort_by_key(|s| (s.from_version, s.to_version));
    Self { scripts, target }
  }

  /// The chain shipped with this build.
  pub fn builtin() -> Self {
    Self::new(schema::builtin_migrations(), schema::SCHEMA_VERSION)
  }

  pub fn target(&self) -> u32 { self.target }

  /// The scripts that take `current` to `target`, in application order.
  ///
  /// Fails if the chain has a gap or a script jumps past `target`.
  pub fn pending_migrations(&self, current: u32, target: u32) -> Result<Vec<&MigrationScript>> {
    if target < current {
      return Err(Error::MigrationFailed {
        version: current,
        reason:  format!("database version {current} is newer than supported version {target}"),
      });
    }

    let mut chain = Vec::new();
    let mut version = current;
    while version < target {
      let next = self
        .scripts
        .iter()
        .find(|s| s.from_version == version)
        .ok_or_else(|| Error::MigrationFailed {
          version: version + 1,
          reason:  format!("no migration registered from version {version}"),
        })?;

      if next.to_version <= version || next.to_version > target {
        return Err(Error::MigrationFailed {
          version: next.to_version,
          reason:  format!(
            "migration {} -> {} does not advance towards version {target}",
            next.from_version, next.to_version
          ),
        });
      }

      chain.push(next);
      version = next.to_version;
    }
    Ok(chain)
  }

  /// Bring the database up to the engine's target.
  ///
  /// Errors are returned only when the run could not start (unreadable
  /// metadata, broken chain, newer database). A script failure is reported
  /// through [`MigrationOutcome::success`] with the migrations applied so far.
  pub fn run_migrations(&self, conn: &mut Connection) -> Result<MigrationOutcome> {
    conn.execute_batch(METADATA_DDL)?;
    let current = current_version(conn)?;
    let pending = self.pending_migrations(current, self.target)?;
    if pending.is_empty() {
      tracing::debug!(version = current, "schema up to date");
      return Ok(MigrationOutcome::up_to_date(current));
    }

    tracing::info!(from = current, to = self.target, steps = pending.len(), "migrating schema");

    let mut tx = conn.transaction()?;
    let mut version = current;
    let mut applied = Vec::with_capacity(pending.len());
    let mut error = None;

    for script in pending {
      match apply_one(&mut tx, script) {
        Ok(()) => {
          tracing::info!(version = script.to_version, "applied migration: {}", script.description);
          version = script.to_version;
          applied.push(script.description.clone());
        }
        Err(e) => {
          tracing::error!(version = script.to_version, error = %e, "migration failed");
          error = Some(format!("migration to version {} failed: {e}", script.to_version));
          break;
        }
      }
    }
    tx.commit()?;

    Ok(MigrationOutcome {
      success: error.is_none(),
      from_version: current,
      to_version: version,
      applied,
      error,
    })
  }

  /// Check every recorded migration against the script registered for its
  /// version. Versions with no registered script are not checked.
  pub fn verify_history(&self, conn: &Connection) -> Result<()> {
    for record in history(conn)? {
      let Some(script) = self.scripts.iter().find(|s| s.to_version == record.version) else {
        continue;
      };
      if script.checksum() != record.checksum {
        return Err(Error::IntegrityFailed(format!(
          "checksum mismatch for migration to version {}",
          record.version
        )));
      }
    }
    Ok(())
  }
}

fn apply_one(tx: &mut Transaction<'_>, script: &MigrationScript) -> rusqlite::Result<()> {
  let sp = tx.savepoint()?;
  (script.apply)(&sp)?;

  let record = MigrationRecord {
    version:     script.to_version,
    description: script.description.clone(),
    applied_at:  now_millis(),
    checksum:    script.checksum(),
  };
  let json = serde_json::to_string(&record)
    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
  sp.execute(
    "INSERT INTO metadata (key, value) VALUES (?1, ?2)",
    rusqlite::params![format!("{MIGRATION_KEY_PREFIX}{}", script.to_version), json],
  )?;
  sp.execute(
    "INSERT INTO metadata (key, value) VALUES (?1, ?2)
     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    rusqlite::params![VERSION_KEY, script.to_version.to_string()],
  )?;

  // Dropping an uncommitted savepoint rolls it back.
  sp.commit()
}

// ─── Metadata readers ────────────────────────────────────────────────────────

/// The schema version recorded in `metadata`; 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<u32> {
  let raw: Option<String> = conn
    .query_row(
      "SELECT value FROM metadata WHERE key = ?1",
      rusqlite::params![VERSION_KEY],
      |row| row.get(0),
    )
    .optional()?;

  match raw {
    None => Ok(0),
    Some(s) => s
      .parse()
      .map_err(|_| Error::IntegrityFailed(format!("unreadable database version {s:?}"))),
  }
}

/// Applied migrations in ascending version order.
pub fn history(conn: &Connection) -> Result<Vec<MigrationRecord>> {
  let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key LIKE ?1")?;
  let raws = stmt
    .query_map(rusqlite::params![format!("{MIGRATION_KEY_PREFIX}%")], |row| {
      row.get::<_, String>(0)
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut records = raws
    .iter()
    .map(|raw| serde_json::from_str::<MigrationRecord>(raw))
    .collect::<serde_json::Result<Vec<_>>>()?;
  records.sort_by_key(|r| r.version);
  Ok(records)
}

/// Check that every table and index the store relies on exists.
pub fn validate_integrity(conn: &Connection) -> Result<()> {
  let mut table_stmt =
    conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
  for table in EXPECTED_TABLES {
    if !table_stmt.exists(rusqlite::params![table])? {
      return Err(Error::IntegrityFailed(format!("missing table {table}")));
    }
  }

  let mut index_stmt = conn.prepare(
    "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1 AND tbl_name = ?2",
  )?;
  for (table, index) in EXPECTED_INDEXES {
    if !index_stmt.exists(rusqlite::params![index, table])? {
      return Err(Error::IntegrityFailed(format!("missing index {index} on {table}")));
    }
  }
  Ok(())
}
