//! Operator configuration: where the store lives, how it is unlocked, and
//! the store options under a `[store]` table.
//!
//! ```toml
//! store_path = "~/.local/share/scanvault/vault.db"
//! passphrase = "correct horse battery staple"
//!
//! [store]
//! retention_days = 30
//! max_records    = 10000
//! ```
//!
//! Every key can be overridden from the environment, e.g.
//! `SCANVAULT_PASSPHRASE` or `SCANVAULT_STORE__RETENTION_DAYS`.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, bail};
use scanvault_core::config::StoreConfig;
use scanvault_store_sqlite::KeySource;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
  #[serde(default = "default_store_path")]
  pub store_path: PathBuf,
  /// Unlocks the wrapped data key. Takes precedence over `seed_hex`.
  pub passphrase: Option<String>,
  /// Hex-encoded device seed the master key is derived from.
  pub seed_hex:   Option<String>,
  #[serde(default)]
  pub store:      StoreConfig,
}

fn default_store_path() -> PathBuf { PathBuf::from("~/.local/share/scanvault/vault.db") }

impl CliConfig {
  /// Read `path` (optional) layered with `SCANVAULT_*` variables.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("SCANVAULT")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .context("failed to read config file")?;

    settings
      .try_deserialize()
      .context("failed to deserialise scanvault config")
  }

  pub fn key_source(&self) -> anyhow::Result<KeySource> {
    match (&self.passphrase, &self.seed_hex) {
      (Some(passphrase), _) => Ok(KeySource::passphrase(passphrase.clone())),
      (None, Some(seed)) => {
        let seed = hex::decode(seed.trim()).context("seed_hex is not valid hex")?;
        Ok(KeySource::Seed(seed))
      }
      (None, None) => bail!("no key configured: set `passphrase` or `seed_hex`"),
    }
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
