//! Core types and trait definitions for the scanvault record store.
//!
//! This crate is deliberately free of database and cryptography
//! dependencies. Storage backends implement [`store::RecordStore`]; the
//! lifecycle and settings layers depend on that abstraction only.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod audit;
pub mod config;
pub mod error;
pub mod event;
pub mod migration;
pub mod record;
pub mod store;

pub use error::{Error, Result};
