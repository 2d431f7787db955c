//! SQLite backend for the scanvault record store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. Payloads are sealed by
//! [`scanvault_crypto::EncryptionEngine`] before any statement is issued;
//! the schema is brought up to date by [`migrate::MigrationEngine`] while
//! the store is opening.

mod encode;
mod retention;
mod store;

pub mod error;
pub mod migrate;
pub mod schema;

pub use error::{Error, Result};
pub use migrate::{MigrationEngine, MigrationScript};
pub use store::{KeySource, SqliteStore, StoreState};

#[cfg(test)]
mod tests;
