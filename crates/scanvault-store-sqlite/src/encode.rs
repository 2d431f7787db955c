//! Encoding and decoding between domain types and `records` rows.
//!
//! Timestamps are stored as epoch-millisecond integers, booleans as 0/1,
//! classification scalars as nullable text. The payload occupies either the
//! three ciphertext columns or `plain_payload`, never both.

use rusqlite::types::Value as SqlValue;
use scanvault_core::{
  record::{Classification, EntityType, Record},
  store::{IndexKey, Order, QueryIndex},
};
use scanvault_crypto::EncryptedPayload;

use crate::{Error, Result};

/// Column list shared by every `SELECT` that produces a [`RawRecord`].
pub const RECORD_COLUMNS: &str = "entity_type, id, timestamp, risk_level, category, region, \
   encrypted, cipher_payload, salt, iv, plain_payload, integrity_hash, schema_version, \
   retention_expiry";

// ─── Payload ─────────────────────────────────────────────────────────────────

/// The stored form of a payload.
#[derive(Debug, Clone)]
pub enum SealedPayload {
  Encrypted(EncryptedPayload),
  /// Canonical JSON text.
  Plain(String),
}

impl SealedPayload {
  pub fn is_encrypted(&self) -> bool { matches!(self, Self::Encrypted(_)) }
}

// ─── Query helpers ───────────────────────────────────────────────────────────

pub fn index_column(index: QueryIndex) -> &'static str {
  match index {
    QueryIndex::Timestamp => "timestamp",
    QueryIndex::RiskLevel => "risk_level",
    QueryIndex::Category => "category",
    QueryIndex::Region => "region",
    QueryIndex::Encrypted => "encrypted",
  }
}

/// Sort expression for `index`. Nullable columns sort as empty text so a
/// keyset comparison never meets a NULL.
pub fn sort_expression(index: QueryIndex) -> &'static str {
  match index {
    QueryIndex::Timestamp => "timestamp",
    QueryIndex::RiskLevel => "COALESCE(risk_level, '')",
    QueryIndex::Category => "COALESCE(category, '')",
    QueryIndex::Region => "COALESCE(region, '')",
    QueryIndex::Encrypted => "encrypted",
  }
}

pub fn order_keyword(order: Order) -> &'static str {
  match order {
    Order::Ascending => "ASC",
    Order::Descending => "DESC",
  }
}

/// Row-value operator that selects rows strictly after a keyset cursor.
pub fn keyset_operator(order: Order) -> &'static str {
  match order {
    Order::Ascending => ">",
    Order::Descending => "<",
  }
}

pub fn encode_index_key(key: &IndexKey) -> SqlValue {
  match key {
    IndexKey::Text(s) => SqlValue::Text(s.clone()),
    IndexKey::Bool(b) => SqlValue::Integer(i64::from(*b)),
    IndexKey::Timestamp(t) => SqlValue::Integer(*t),
  }
}

// ─── Row type ────────────────────────────────────────────────────────────────

/// Raw column values of one `records` row.
#[derive(Debug, Clone)]
pub struct RawRecord {
  pub entity_type:      String,
  pub id:               String,
  pub timestamp:        i64,
  pub risk_level:       Option<String>,
  pub category:         Option<String>,
  pub region:           Option<String>,
  pub encrypted:        bool,
  pub cipher_payload:   Option<String>,
  pub salt:             Option<String>,
  pub iv:               Option<String>,
  pub plain_payload:    Option<String>,
  pub integrity_hash:   String,
  pub schema_version:   u32,
  pub retention_expiry: i64,
}

impl RawRecord {
  /// Build a row ready for insertion.
  #[allow(clippy::too_many_arguments)]
  pub fn seal(
    entity_type: EntityType,
    id: String,
    timestamp: i64,
    classification: Classification,
    payload: SealedPayload,
    integrity_hash: String,
    schema_version: u32,
    retention_expiry: i64,
  ) -> Self {
    let encrypted = payload.is_encrypted();
    let (cipher_payload, salt, iv, plain_payload) = match payload {
      SealedPayload::Encrypted(p) => (Some(p.cipher_payload), Some(p.salt), Some(p.iv), None),
      SealedPayload::Plain(json) => (None, None, None, Some(json)),
    };
    Self {
      entity_type: entity_type.as_str().to_owned(),
      id,
      timestamp,
      risk_level: classification.risk_level,
      category: classification.category,
      region: classification.region,
      encrypted,
      cipher_payload,
      salt,
      iv,
      plain_payload,
      integrity_hash,
      schema_version,
      retention_expiry,
    }
  }

  /// Read a row selected with [`RECORD_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      entity_type:      row.get(0)?,
      id:               row.get(1)?,
      timestamp:        row.get(2)?,
      risk_level:       row.get(3)?,
      category:         row.get(4)?,
      region:           row.get(5)?,
      encrypted:        row.get(6)?,
      cipher_payload:   row.get(7)?,
      salt:             row.get(8)?,
      iv:               row.get(9)?,
      plain_payload:    row.get(10)?,
      integrity_hash:   row.get(11)?,
      schema_version:   row.get(12)?,
      retention_expiry: row.get(13)?,
    })
  }

  pub fn classification(&self) -> Classification {
    Classification {
      risk_level: self.risk_level.clone(),
      category:   self.category.clone(),
      region:     self.region.clone(),
    }
  }

  /// The `(sort key, timestamp, entity_type, id)` tuple a query resumes
  /// after, matching [`sort_expression`].
  pub fn keyset(&self, index: QueryIndex) -> [SqlValue; 4] {
    let text = |v: &Option<String>| SqlValue::Text(v.clone().unwrap_or_default());
    let sort_key = match index {
      QueryIndex::Timestamp => SqlValue::Integer(self.timestamp),
      QueryIndex::RiskLevel => text(&self.risk_level),
      QueryIndex::Category => text(&self.category),
      QueryIndex::Region => text(&self.region),
      QueryIndex::Encrypted => SqlValue::Integer(i64::from(self.encrypted)),
    };
    [
      sort_key,
      SqlValue::Integer(self.timestamp),
      SqlValue::Text(self.entity_type.clone()),
      SqlValue::Text(self.id.clone()),
    ]
  }

  fn corrupt(&self, reason: impl Into<String>) -> Error {
    Error::CorruptRecord { id: self.id.clone(), reason: reason.into() }
  }

  /// Split into record metadata and the stored payload, checking the
  /// exactly-one-payload invariant.
  pub fn into_parts(self) -> Result<(Record, SealedPayload)> {
    let payload = match (
      self.encrypted,
      &self.cipher_payload,
      &self.salt,
      &self.iv,
      &self.plain_payload,
    ) {
      (true, Some(cipher), Some(salt), Some(iv), None) => {
        SealedPayload::Encrypted(EncryptedPayload {
          cipher_payload: cipher.clone(),
          salt:           salt.clone(),
          iv:             iv.clone(),
        })
      }
      (false, None, None, None, Some(json)) => SealedPayload::Plain(json.clone()),
      _ => return Err(self.corrupt("payload columns are inconsistent with the encrypted flag")),
    };

    if self.retention_expiry < self.timestamp {
      return Err(self.corrupt("retention expiry precedes creation time"));
    }

    let classification = self.classification();
    let entity_type = self
      .entity_type
      .parse::<EntityType>()
      .map_err(|e| self.corrupt(e.to_string()))?;

    let record = Record {
      entity_type,
      id: self.id,
      timestamp: self.timestamp,
      classification,
      encrypted: self.encrypted,
      integrity_hash: self.integrity_hash,
      schema_version: self.schema_version,
      retention_expiry: self.retention_expiry,
    };
    Ok((record, payload))
  }
}
