//! Built-in command engine.
//!
//! Messages starting with `!<prefix>` (`!ronron` by default) are commands for the
//! bot. The reply is sent back to the chat the command came from, through the
//! open session.
//!
//! ```text
//! NormalizedMessage
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Commander  │  parse() → Command → parse_command() → CommandResult
//! └─────────────┘
//!      │
//!      ▼
//! ActiveSession::send_message(chat_id, response)
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `help` | Display help information |
//! | `ping` | Reply `pong` |
//! | `groups` | List the cached groups |
//! | `whoami` | Show the sender id and the kind of chat |
//!
//! Messages that are not commands, or commands for another bot, are ignored
//! ([`CommandParseError::NotForBot`]). Unknown sub-commands get an error reply
//! ([`CommandParseError::InvalidCommand`]).
//!
//! - [`commander`] - parsing and execution entry point
//! - [`command`] - command enum and parsing
//! - [`actions`] - one handler per command
//! - [`responses`] - reply formatting

mod actions;
mod command;
mod commander;
mod responses;

pub use crate::commands::commander::Commander;
use crate::{events::ChatKind, transport::GroupMetadata};

/// Runtime context for command execution.
#[derive(Debug)]
pub struct CommandContext {
    /// Cached groups, sorted by subject
    pub groups: Vec<GroupMetadata>,
    /// Chat the command was sent in
    pub chat_id: String,
    pub chat_kind: ChatKind,
    /// Subject of the chat when it is a known group
    pub group_subject: Option<String>,
    /// Author of the command
    pub sender: String,
    pub sender_name: Option<String>,
}

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult {
    /// Reply sent to the chat
    pub response: String,
}

/// Errors that can occur during command parsing.
///
/// * `NotForBot` - not a command, or a command for another bot. Ignored silently.
/// * `InvalidCommand` - a command for this bot that cannot be run, with the reply
///   explaining why.
#[derive(Debug)]
pub enum CommandParseError {
    /// Message is not for this bot (silent error)
    NotForBot,
    /// Invalid command syntax with error message
    InvalidCommand(String),
}
