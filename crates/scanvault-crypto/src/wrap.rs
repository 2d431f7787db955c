//! Data-key wrapping.
//!
//! The data key is random. It is persisted only in wrapped form: sealed with
//! AES-256-GCM under a key-encryption key derived from the user's passphrase
//! with Argon2id. The Argon2 parameters and salt travel with the wrapped key
//! so a later unwrap uses exactly the same derivation.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::{
  EncryptionError, Result,
  engine::{IV_LEN, open_bytes, random_iv, seal_bytes},
  kdf::{KEY_LEN, KeyBytes, kek_from_passphrase, random_salt},
};

const WRAP_AAD: &[u8] = b"scanvault-key-wrap-v1";

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
  pub m_cost_kib: u32,
  pub t_cost:     u32,
  pub p_cost:     u32,
}

impl Default for KdfParams {
  /// 19 MiB, 2 passes, 1 lane: interactive unlock on a phone-class device.
  fn default() -> Self { Self { m_cost_kib: 19 * 1024, t_cost: 2, p_cost: 1 } }
}

impl KdfParams {
  /// Minimal cost, for unit tests only.
  pub fn for_testing() -> Self { Self { m_cost_kib: 64, t_cost: 1, p_cost: 1 } }
}

/// A data key sealed under a passphrase-derived key. Safe to store in the
/// clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
  pub kdf:      KdfParams,
  /// Base64 Argon2id salt.
  pub kdf_salt: String,
  /// Base64 AES-GCM IV.
  pub iv:       String,
  /// Base64 ciphertext + tag of the data key.
  pub wrapped:  String,
}

impl WrappedKey {
  /// Seal `data_key` under `passphrase`.
  pub(crate) fn wrap(data_key: &[u8; KEY_LEN], passphrase: &[u8], kdf: KdfParams) -> Result<Self> {
    let salt = random_salt();
    let kek = kek_from_passphrase(passphrase, &salt, &kdf)?;
    let iv = random_iv();
    let wrapped = seal_bytes(&kek, &iv, data_key, WRAP_AAD)?;

    Ok(Self {
      kdf,
      kdf_salt: BASE64.encode(salt),
      iv: BASE64.encode(iv),
      wrapped: BASE64.encode(wrapped),
    })
  }

  /// Recover the data key. A wrong passphrase surfaces as
  /// [`EncryptionError::DecryptionFailed`].
  pub(crate) fn unwrap_key(&self, passphrase: &[u8]) -> Result<KeyBytes> {
    let salt = decode(&self.kdf_salt)?;
    let iv = decode(&self.iv)?;
    if iv.len() != IV_LEN {
      return Err(EncryptionError::DecryptionFailed);
    }
    let wrapped = decode(&self.wrapped)?;

    let kek = kek_from_passphrase(passphrase, &salt, &self.kdf)?;
    let plain = open_bytes(&kek, &iv, &wrapped, WRAP_AAD)?;
    if plain.len() != KEY_LEN {
      return Err(EncryptionError::DecryptionFailed);
    }

    let mut key = KeyBytes::new([0u8; KEY_LEN]);
    key.copy_from_slice(&plain);
    Ok(key)
  }
}

fn decode(s: &str) -> Result<Vec<u8>> {
  BASE64.decode(s).map_err(|_| EncryptionError::DecryptionFailed)
}
