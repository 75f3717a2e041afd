//! # fatbundle common library
//!
//! Shared code for the fatbundle crates:
//! - Fat bundle and word-entity document model
//! - Document store boundary (in-memory and SQLite)
//! - Configuration loading
//! - Common error type

pub mod bundle;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod store;

pub use bundle::{FatBundle, Language, WordEntity};
pub use error::{Error, Result};
pub use store::{DocumentStore, MemoryStore};
