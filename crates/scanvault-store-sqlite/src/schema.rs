//! SQL schema for the scanvault SQLite store, expressed as a migration chain.
//!
//! Version 0 is an empty database. Each script advances exactly one version
//! and is idempotent, so re-running a half-applied step is harmless.

use rusqlite::Connection;

use crate::migrate::MigrationScript;

/// The schema version this build reads and writes.
pub const SCHEMA_VERSION: u32 = 3;

pub const RECORDS_TABLE: &str = "records";
pub const METADATA_TABLE: &str = "metadata";

/// `metadata` key holding the current schema version.
pub const VERSION_KEY: &str = "database_version";
/// `metadata` key holding the passphrase-wrapped data key.
pub const WRAPPED_KEY_KEY: &str = "wrapped_data_key";
/// `metadata` key holding the key source kind and a sealed canary, written
/// on first open and checked on every later one.
pub const KEY_CHECK_KEY: &str = "key_check";
/// `metadata` key prefix for applied-migration records.
pub const MIGRATION_KEY_PREFIX: &str = "migration_";

pub const EXPECTED_TABLES: [&str; 2] = [RECORDS_TABLE, METADATA_TABLE];

/// Every index the store relies on, as `(table, index)`.
pub const EXPECTED_INDEXES: [(&str, &str); 6] = [
  (RECORDS_TABLE, "records_timestamp_idx"),
  (RECORDS_TABLE, "records_encrypted_idx"),
  (RECORDS_TABLE, "records_risk_idx"),
  (RECORDS_TABLE, "records_category_idx"),
  (RECORDS_TABLE, "records_region_idx"),
  (RECORDS_TABLE, "records_expiry_idx"),
];

/// Bootstrap DDL for the metadata table; needed before the version can be
/// read, so the migration engine runs it ahead of any script.
pub const METADATA_DDL: &str = "
CREATE TABLE IF NOT EXISTS metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const V1_DDL: &str = "
CREATE TABLE IF NOT EXISTS records (
    entity_type      TEXT    NOT NULL,   -- 'scan_result' | 'setting'
    id               TEXT    NOT NULL,
    timestamp        INTEGER NOT NULL,   -- epoch ms; immutable
    encrypted        INTEGER NOT NULL CHECK (encrypted IN (0, 1)),
    cipher_payload   TEXT,               -- base64 ciphertext + tag
    salt             TEXT,               -- base64
    iv               TEXT,               -- base64
    plain_payload    TEXT,               -- JSON, only when not encrypted
    integrity_hash   TEXT    NOT NULL,   -- SHA-256 hex of canonical JSON
    schema_version   INTEGER NOT NULL,
    retention_expiry INTEGER NOT NULL,   -- epoch ms
    PRIMARY KEY (entity_type, id),
    CHECK (retention_expiry >= timestamp),
    CHECK (
      (encrypted = 1 AND cipher_payload IS NOT NULL AND salt IS NOT NULL
                     AND iv IS NOT NULL AND plain_payload IS NULL)
      OR
      (encrypted = 0 AND plain_payload IS NOT NULL AND cipher_payload IS NULL
                     AND salt IS NULL AND iv IS NULL)
    )
);

CREATE TABLE IF NOT EXISTS metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS records_timestamp_idx ON records(timestamp);
CREATE INDEX IF NOT EXISTS records_encrypted_idx ON records(encrypted);
";

fn v1_create_records(conn: &Connection) -> rusqlite::Result<()> {
  conn.execute_batch(V1_DDL)
}

fn v2_classification(conn: &Connection) -> rusqlite::Result<()> {
  add_column_if_missing(conn, RECORDS_TABLE, "risk_level", "TEXT")?;
  add_column_if_missing(conn, RECORDS_TABLE, "category", "TEXT")?;
  conn.execute_batch(
    "CREATE INDEX IF NOT EXISTS records_risk_idx     ON records(risk_level);
     CREATE INDEX IF NOT EXISTS records_category_idx ON records(category);",
  )
}

fn v3_region_and_expiry(conn: &Connection) -> rusqlite::Result<()> {
  add_column_if_missing(conn, RECORDS_TABLE, "region", "TEXT")?;
  conn.execute_batch(
    "CREATE INDEX IF NOT EXISTS records_region_idx ON records(region);
     CREATE INDEX IF NOT EXISTS records_expiry_idx ON records(retention_expiry);",
  )
}

/// The migration chain shipped with this build, `0 → SCHEMA_VERSION`.
pub fn builtin_migrations() -> Vec<MigrationScript> {
  vec![
    MigrationScript::new(
      0,
      1,
      "create records and metadata tables",
      v1_create_records,
    ),
    MigrationScript::new(1, 2, "add risk level and category classification", v2_classification),
    MigrationScript::new(2, 3, "add region classification and expiry index", v3_region_and_expiry),
  ]
}

/// Whether `table` has a column called `column`.
pub fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
  let mut stmt = conn.prepare("SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2")?;
  stmt.exists(rusqlite::params![table, column])
}

fn add_column_if_missing(
  conn: &Connection,
  table: &str,
  column: &str,
  decl: &str,
) -> rusqlite::Result<()> {
  if !has_column(conn, table, column)? {
    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl};"))?;
  }
  Ok(())
}
