//! Encryption engine for the scanvault record store.
//!
//! - Record payloads are sealed with AES-256-GCM (96-bit IV, 128-bit tag).
//!   Each call draws a fresh 16-byte salt and derives a per-record subkey
//!   from the master key with HKDF-SHA256, so neither keys nor IVs repeat.
//! - The master key is either random, derived from a high-entropy seed, or a
//!   random data key wrapped under an Argon2id passphrase key so it can be
//!   persisted next to the data.
//! - Integrity hashes are SHA-256 over the canonical JSON encoding and are
//!   independent of encryption.

pub mod engine;
pub mod error;
pub mod hash;
pub mod kdf;
pub mod wrap;

pub use engine::{EncryptedPayload, EncryptionEngine};
pub use error::{EncryptionError, Result};
pub use wrap::{KdfParams, WrappedKey};
