//! Contract between the session manager and the messaging service.
//!
//! A [`Connector`] builds one transport connection per session attempt. The
//! connection hands back a [`Transport`] for outbound calls and an ordered
//! stream of [`EventUnit`]s for inbound events.
//!
//! The only connector shipped with the crate is the [`bridge`] one, which drives
//! a protocol implementation living in a child process.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use mockall::automock;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::store::{Credentials, KeyStore};

pub mod bridge;
mod events;
mod protocol;

pub use crate::transport::events::{
    BatchKind, ConnectionPhase, ConnectionUpdate, Contact, DisconnectReason, EventUnit,
    GroupMetadata, MessageBatch, Participant, RawMessage,
};

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no open session")]
    NotConnected,
    #[error("failed to spawn the bridge process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("bridge i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bridge protocol error: {0}")]
    Protocol(String),
    #[error("request {0} timed out")]
    Timeout(u64),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("connection closed")]
    Closed,
}

/// Synchronous group lookup handed to the transport.
///
/// The transport calls it while encoding group messages, so it must answer from
/// memory without suspending.
pub trait GroupLookup: Send + Sync {
    fn group_metadata(&self, group_id: &str) -> Option<GroupMetadata>;
}

/// Everything a transport receives at construction.
#[derive(Clone)]
pub struct TransportSetup {
    /// Persisted credentials, `None` to start a new pairing
    pub credentials: Option<Credentials>,
    /// Key material storage
    pub keys: Arc<dyn KeyStore>,
    /// Cached group metadata
    pub groups: Arc<dyn GroupLookup>,
}

/// An established transport connection.
pub struct Connection {
    pub transport: Arc<dyn Transport>,
    /// Inbound events, in delivery order
    pub events: mpsc::Receiver<EventUnit>,
}

/// Builds transport connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Starts a new connection, including a fresh handshake.
    async fn connect(&self, setup: TransportSetup) -> Result<Connection, TransportError>;
}

/// Outbound side of a transport connection.
#[automock]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a text message to a chat.
    async fn send_message(&self, recipient: &str, text: &str) -> Result<(), TransportError>;
    /// Fetches every group the account participates in, keyed by group id.
    async fn fetch_all_groups(&self) -> Result<HashMap<String, GroupMetadata>, TransportError>;
    /// Fetches the metadata of one group.
    async fn fetch_group(&self, group_id: &str) -> Result<GroupMetadata, TransportError>;
    /// Closes the connection. Pending requests fail with [`TransportError::Closed`].
    async fn close(&self);
}
