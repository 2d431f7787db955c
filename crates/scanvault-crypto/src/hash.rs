//! SHA-256 content hashing over canonical JSON.
//!
//! Canonical means: serialised through `serde_json::Value`, whose object
//! maps are key-sorted, then written compactly. Two values that compare
//! equal as JSON always hash the same regardless of field order.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{EncryptionError, Result};

/// Canonical byte encoding of `value`.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
  let normalised =
    serde_json::to_value(value).map_err(|e| EncryptionError::HashFailed(e.to_string()))?;
  serde_json::to_vec(&normalised).map_err(|e| EncryptionError::HashFailed(e.to_string()))
}

/// Lowercase hex SHA-256 of raw bytes.
pub fn digest_hex(data: &[u8]) -> String { hex::encode(Sha256::digest(data)) }

/// Lowercase hex SHA-256 of the canonical encoding of `value`.
pub fn hash<T: Serialize + ?Sized>(value: &T) -> Result<String> {
  Ok(digest_hex(&canonical_bytes(value)?))
}

/// Whether `digest` is the hash of `value`. Malformed digests never verify.
pub fn verify_hash<T: Serialize + ?Sized>(value: &T, digest: &str) -> Result<bool> {
  let expected = match hex::decode(digest) {
    Ok(bytes) => bytes,
    Err(_) => return Ok(false),
  };
  let actual = Sha256::digest(canonical_bytes(value)?);
  Ok(constant_time_eq(&actual, &expected))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
  if a.len() != b.len() {
    return false;
  }
  a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
