//! Durable state kept in a single SQLite database.
//!
//! The database runs in WAL mode and every write goes through a transaction, so a
//! crash in the middle of a write leaves the previous committed value readable.
//!
//! - [`database`] - connection setup, pragmas and schema
//! - [`credentials`] - session credentials and transport key material
//! - [`messages`] - log of every dispatched message
//! - [`groups`] - optional snapshot of the group roster

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

mod credentials;
mod database;
mod groups;
mod messages;

pub use crate::store::{
    credentials::{CredentialStore, Credentials, CredentialsUpdate, KeyChange},
    database::Database,
    groups::GroupStore,
    messages::MessageLog,
};

/// Errors raised by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("database connection lock is poisoned")]
    Poisoned,
}

/// Read and write access to transport key material.
///
/// Keys are grouped by category (pre-keys, sessions, sender keys...) and addressed
/// by id inside a category. Values are opaque to this crate.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Returns the stored values for `ids`, skipping the ids that have no value.
    async fn get_keys(
        &self,
        category: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Value>, StoreError>;

    /// Applies a batch of changes atomically.
    async fn set_keys(&self, changes: Vec<KeyChange>) -> Result<(), StoreError>;
}
