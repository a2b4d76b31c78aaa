//! Session lifecycle.
//!
//! - [`active`] - shared handle on the transport of the open session
//! - [`connection`] - one transport connection and its state machine
//! - [`reconnect`] - backoff policy and reconnect decisions
//! - [`supervisor`] - the reconnect loop driving sessions one after the other

use thiserror::Error;

use crate::{store::StoreError, transport::TransportError};

mod active;
mod connection;
mod reconnect;
mod supervisor;

pub use crate::session::{
    active::ActiveSession,
    connection::{ConnectionSession, ConnectionState},
    reconnect::{BackoffPolicy, Decision, ReconnectController},
    supervisor::{SessionExit, Supervisor},
};

/// Errors ending one session attempt.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Settings shared by every session.
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    /// Chat receiving the online message, the account itself when unset
    pub notify_recipient: Option<String>,
    /// Text sent each time a session opens
    pub online_message: String,
}
