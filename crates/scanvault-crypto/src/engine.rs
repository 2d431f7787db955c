//! The encryption engine: master key lifecycle plus record seal/open.
//!
//! Sealed payload wire format (all fields standard base64):
//!   salt        — 16 random bytes, HKDF salt for the per-record subkey
//!   iv          — 12 random bytes, AES-GCM nonce
//!   cipher      — ciphertext || 16-byte tag

use std::{fmt, sync::OnceLock};

use aes_gcm::{
  Aes256Gcm, KeyInit, Nonce,
  aead::{Aead, Payload},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use zeroize::Zeroizing;

use crate::{
  EncryptionError, Result, hash,
  kdf::{KEY_LEN, KeyBytes, master_key_from_seed, random_key, random_salt, record_key},
  wrap::{KdfParams, WrappedKey},
};

pub const IV_LEN: usize = 12;

const RECORD_AAD: &[u8] = b"scanvault-record";

/// The sealed form of one value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
  pub cipher_payload: String,
  pub salt:           String,
  pub iv:             String,
}

// ─── Raw AEAD helpers ────────────────────────────────────────────────────────

pub(crate) fn random_iv() -> [u8; IV_LEN] {
  let mut iv = [0u8; IV_LEN];
  OsRng.fill_bytes(&mut iv);
  iv
}

pub(crate) fn seal_bytes(
  key: &[u8; KEY_LEN],
  iv: &[u8],
  plaintext: &[u8],
  aad: &[u8],
) -> Result<Vec<u8>> {
  if iv.len() != IV_LEN {
    return Err(EncryptionError::EncryptionFailed("bad IV length".into()));
  }
  let cipher = Aes256Gcm::new_from_slice(key)
    .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;
  cipher
    .encrypt(Nonce::from_slice(iv), Payload { msg: plaintext, aad })
    .map_err(|_| EncryptionError::EncryptionFailed("AES-GCM seal failed".into()))
}

pub(crate) fn open_bytes(
  key: &[u8; KEY_LEN],
  iv: &[u8],
  ciphertext: &[u8],
  aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
  if iv.len() != IV_LEN {
    return Err(EncryptionError::DecryptionFailed);
  }
  let cipher =
    Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::DecryptionFailed)?;
  let plaintext = cipher
    .decrypt(Nonce::from_slice(iv), Payload { msg: ciphertext, aad })
    .map_err(|_| EncryptionError::DecryptionFailed)?;
  Ok(Zeroizing::new(plaintext))
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Holds the master key and seals/opens values with it.
///
/// The key is set exactly once and never leaves the engine. Share the engine
/// behind an `Arc`; every method takes `&self`.
#[derive(Default)]
pub struct EncryptionEngine {
  master: OnceLock<KeyBytes>,
}

impl fmt::Debug for EncryptionEngine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EncryptionEngine")
      .field("initialized", &self.is_initialized())
      .finish_non_exhaustive()
  }
}

impl EncryptionEngine {
  pub fn new() -> Self { Self::default() }

  /// Establish the master key: derived from `seed` when given, otherwise
  /// freshly random (and therefore lost when the process exits).
  pub fn initialize(&self, seed: Option<&[u8]>) -> Result<()> {
    if self.is_initialized() {
      return Err(EncryptionError::AlreadyInitialized);
    }
    let key = match seed {
      Some(seed) => master_key_from_seed(seed)?,
      None => random_key(),
    };
    self.install(key)?;
    tracing::debug!(seeded = seed.is_some(), "encryption engine initialized");
    Ok(())
  }

  /// Establish the master key from a passphrase-wrapped data key.
  ///
  /// With `existing`, the stored data key is unwrapped and `existing` is
  /// returned unchanged. Otherwise a new data key is generated and the
  /// returned [`WrappedKey`] must be persisted by the caller.
  pub fn initialize_wrapped(
    &self,
    passphrase: &[u8],
    existing: Option<&WrappedKey>,
    kdf: KdfParams,
  ) -> Result<WrappedKey> {
    if self.is_initialized() {
      return Err(EncryptionError::AlreadyInitialized);
    }
    let (key, wrapped) = match existing {
      Some(wrapped) => (wrapped.unwrap_key(passphrase)?, wrapped.clone()),
      None => {
        let key = random_key();
        let wrapped = WrappedKey::wrap(&key, passphrase, kdf)?;
        (key, wrapped)
      }
    };
    self.install(key)?;
    tracing::debug!(fresh = existing.is_none(), "encryption engine unlocked");
    Ok(wrapped)
  }

  pub fn is_initialized(&self) -> bool { self.master.get().is_some() }

  fn install(&self, key: KeyBytes) -> Result<()> {
    self
      .master
      .set(key)
      .map_err(|_| EncryptionError::AlreadyInitialized)
  }

  fn master(&self) -> Result<&KeyBytes> {
    self.master.get().ok_or(EncryptionError::NotInitialized)
  }

  /// Seal `value` under a fresh salt and IV.
  pub fn encrypt<T: Serialize + ?Sized>(&self, value: &T) -> Result<EncryptedPayload> {
    let master = self.master()?;
    let plaintext = Zeroizing::new(
      hash::canonical_bytes(value)
        .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?,
    );

    let salt = random_salt();
    let iv = random_iv();
    let key = record_key(master, &salt)?;
    let ciphertext = seal_bytes(&key, &iv, &plaintext, RECORD_AAD)?;

    Ok(EncryptedPayload {
      cipher_payload: BASE64.encode(ciphertext),
      salt:           BASE64.encode(salt),
      iv:             BASE64.encode(iv),
    })
  }

  /// Open a sealed payload. Any tampering, key mismatch or malformed field
  /// yields [`EncryptionError::DecryptionFailed`].
  pub fn decrypt<T: DeserializeOwned>(&self, payload: &EncryptedPayload) -> Result<T> {
    let master = self.master()?;
    let decode = |s: &str| BASE64.decode(s).map_err(|_| EncryptionError::DecryptionFailed);

    let salt = decode(&payload.salt)?;
    let iv = decode(&payload.iv)?;
    let ciphertext = decode(&payload.cipher_payload)?;

    let key = record_key(master, &salt)?;
    let plaintext = open_bytes(&key, &iv, &ciphertext, RECORD_AAD)?;
    serde_json::from_slice(&plaintext).map_err(|_| EncryptionError::DecryptionFailed)
  }

  /// SHA-256 hex digest of the canonical encoding of `value`.
  pub fn hash<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> { hash::hash(value) }

  pub fn verify_hash<T: Serialize + ?Sized>(&self, value: &T, digest: &str) -> Result<bool> {
    hash::verify_hash(value, digest)
  }

  /// Exercise the primitives end to end. Returns `false` on any failure,
  /// including an uninitialized engine.
  pub fn self_test(&self) -> bool {
    match self.run_self_test() {
      Ok(()) => true,
      Err(e) => {
        tracing::warn!(error = %e, "crypto self-test failed");
        false
      }
    }
  }

  fn run_self_test(&self) -> Result<()> {
    let probe = serde_json::json!({
      "probe": "scanvault-self-test",
      "numbers": [1, 2, 3],
      "nested": { "ok": true },
    });
    let check = |ok: bool, what: &str| {
      if ok { Ok(()) } else { Err(EncryptionError::HashFailed(what.to_owned())) }
    };

    let sealed = self.encrypt(&probe)?;
    let opened: serde_json::Value = self.decrypt(&sealed)?;
    check(opened == probe, "round-trip mismatch")?;

    let again = self.encrypt(&probe)?;
    check(again.iv != sealed.iv && again.salt != sealed.salt, "salt/IV reuse")?;

    let digest = self.hash(&probe)?;
    check(self.verify_hash(&opened, &digest)?, "hash verification")?;

    let mut tampered = sealed;
    tampered.cipher_payload = flip_first_byte(&tampered.cipher_payload)?;
    check(
      self.decrypt::<serde_json::Value>(&tampered).is_err(),
      "tampering not detected",
    )
  }
}

fn flip_first_byte(b64: &str) -> Result<String> {
  let mut bytes = BASE64.decode(b64).map_err(|_| EncryptionError::DecryptionFailed)?;
  if let Some(first) = bytes.first_mut() {
    *first ^= 0x01;
  }
  Ok(BASE64.encode(bytes))
}
