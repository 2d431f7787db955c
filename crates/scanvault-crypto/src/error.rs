use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncryptionError {
  #[error("encryption engine is not initialized")]
  NotInitialized,

  #[error("encryption engine is already initialized")]
  AlreadyInitialized,

  #[error("encryption failed: {0}")]
  EncryptionFailed(String),

  /// Authentication tag mismatch, wrong key, or malformed ciphertext.
  /// Never accompanied by partial plaintext.
  #[error("decryption failed (authentication tag mismatch or malformed payload)")]
  DecryptionFailed,

  #[error("hashing failed: {0}")]
  HashFailed(String),

  #[error("key derivation failed: {0}")]
  KeyDerivation(String),
}

pub type Result<T, E = EncryptionError> = std::result::Result<T, E>;
