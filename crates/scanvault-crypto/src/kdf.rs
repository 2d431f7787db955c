//! Key derivation functions
//!
//! `master_key_from_seed` — HKDF-SHA256, deterministic master key from a
//!   caller-supplied high-entropy seed.
//!
//! `record_key` — HKDF-SHA256, per-record subkey from the master key and the
//!   record's random salt.
//!
//! `kek_from_passphrase` — Argon2id, key-encryption key for wrapping the
//!   data key under a user secret.

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{EncryptionError, Result, wrap::KdfParams};

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;

const SEED_SALT: &[u8] = b"scanvault-master-seed-v1";
const SEED_INFO: &[u8] = b"scanvault-master-key";
const RECORD_INFO: &[u8] = b"scanvault-record-v1";

pub type KeyBytes = Zeroizing<[u8; KEY_LEN]>;

/// Fresh random key material from the OS RNG.
pub fn random_key() -> KeyBytes {
  let mut key = Zeroizing::new([0u8; KEY_LEN]);
  OsRng.fill_bytes(key.as_mut_slice());
  key
}

/// Fresh random salt from the OS RNG.
pub fn random_salt() -> [u8; SALT_LEN] {
  let mut salt = [0u8; SALT_LEN];
  OsRng.fill_bytes(&mut salt);
  salt
}

/// Derive the master key from a seed. The same seed always yields the same
/// key, so records sealed under it survive a restart.
pub fn master_key_from_seed(seed: &[u8]) -> Result<KeyBytes> {
  if seed.is_empty() {
    return Err(EncryptionError::KeyDerivation("seed must not be empty".into()));
  }
  let mut key = Zeroizing::new([0u8; KEY_LEN]);
  Hkdf::<Sha256>::new(Some(SEED_SALT), seed)
    .expand(SEED_INFO, key.as_mut_slice())
    .map_err(|e| EncryptionError::KeyDerivation(e.to_string()))?;
  Ok(key)
}

/// Derive the subkey used to seal a single record.
pub fn record_key(master: &[u8; KEY_LEN], salt: &[u8]) -> Result<KeyBytes> {
  let mut key = Zeroizing::new([0u8; KEY_LEN]);
  Hkdf::<Sha256>::new(Some(salt), master)
    .expand(RECORD_INFO, key.as_mut_slice())
    .map_err(|e| EncryptionError::KeyDerivation(e.to_string()))?;
  Ok(key)
}

/// Derive a key-encryption key from a passphrase with Argon2id.
pub fn kek_from_passphrase(
  passphrase: &[u8],
  salt: &[u8],
  params: &KdfParams,
) -> Result<KeyBytes> {
  let params = Params::new(params.m_cost_kib, params.t_cost, params.p_cost, Some(KEY_LEN))
    .map_err(|e| EncryptionError::KeyDerivation(e.to_string()))?;
  let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

  let mut key = Zeroizing::new([0u8; KEY_LEN]);
  argon2
    .hash_password_into(passphrase, salt, key.as_mut_slice())
    .map_err(|e| EncryptionError::KeyDerivation(e.to_string()))?;
  Ok(key)
}
