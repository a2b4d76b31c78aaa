//! Command orchestration and execution.
//!
//! This module provides the [`Commander`] struct, the command engine plugged into
//! the message dispatcher. It parses a message, runs the matching handler and sends
//! the reply through the open session.
//!
//! # Flow
//!
//! ```text
//! NormalizedMessage → parse() → Command → parse_command() → CommandResult → reply
//! ```

use anyhow::Context;
use async_trait::async_trait;
use command_parser::Parser;
use log::{debug, info};

use crate::{
    commands::{
        CommandContext, CommandParseError, CommandResult,
        actions::{handle_groups, handle_help, handle_ping, handle_whoami},
        command::{Command, format_command_error},
    },
    events::{ChatKind, CommandEngine, NormalizedMessage},
    session::ActiveSession,
};

/// Command engine answering `!<prefix> <command>` messages.
///
/// Messages without the prefix are silently ignored (returning
/// [`CommandParseError::NotForBot`]).
pub struct Commander {
    /// Command parser for processing user commands
    parser: Parser,
    /// Command name the bot answers to
    prefix: String,
    /// Session replies are sent through
    active: ActiveSession,
}

impl Commander {
    /// Creates a new Commander.
    ///
    /// The parser recognizes `!` as the command prefix and `-` as the option prefix.
    ///
    /// # Arguments
    ///
    /// * `prefix` - Command name the bot answers to, `ronron` for `!ronron help`
    /// * `active` - Session used to send replies and read the group cache
    pub fn new(prefix: &str, active: ActiveSession) -> Self {
        let parser = Parser::new('!', '-');
        Commander {
            parser,
            prefix: prefix.to_owned(),
            active,
        }
    }

    /// Parses a message body into a structured command.
    ///
    /// # Returns
    ///
    /// * `Ok(Command)` - Successfully parsed and validated command
    /// * `Err(CommandParseError::NotForBot)` - Message is not a command or for a different bot
    /// * `Err(CommandParseError::InvalidCommand)` - Command is unknown, with the reply to send
    pub fn parse(&self, body: &str) -> Result<Command, CommandParseError> {
        Command::parse(&self.parser, &self.prefix, body).map_err(|error| {
            // Return silently if the command is not for the bot
            // Otherwise, send an error message
            match format_command_error(error, &self.prefix) {
                Some(message) => CommandParseError::InvalidCommand(message),
                None => CommandParseError::NotForBot,
            }
        })
    }

    /// Executes a parsed command and returns the result.
    ///
    /// # Command Handlers
    ///
    /// - [`Command::Help`] → [`handle_help`]
    /// - [`Command::Ping`] → [`handle_ping`]
    /// - [`Command::Groups`] → [`handle_groups`]
    /// - [`Command::Whoami`] → [`handle_whoami`]
    pub fn parse_command(&self, command: &Command, context: &CommandContext) -> CommandResult {
        match command {
            Command::Help => handle_help(&self.prefix),
            Command::Ping => handle_ping(),
            Command::Groups => handle_groups(context),
            Command::Whoami => handle_whoami(context),
        }
    }

    async fn create_context(&self, message: &NormalizedMessage) -> CommandContext {
        // The subject of a group missing from the cache is fetched once
        let group_subject = match (message.chat_kind, &message.group_subject) {
            (ChatKind::Group, None) => match self.active.group_metadata(&message.chat_id).await {
                Ok(group) => Some(group.subject),
                Err(e) => {
                    debug!("no metadata for {}: {}", message.chat_id, e);
                    None
                }
            },
            _ => message.group_subject.clone(),
        };

        CommandContext {
            groups: self.active.cache().groups(),
            chat_id: message.chat_id.clone(),
            chat_kind: message.chat_kind,
            group_subject,
            sender: message.sender.clone(),
            sender_name: message.sender_name.clone(),
        }
    }

    async fn reply(&self, chat_id: &str, text: &str) -> anyhow::Result<()> {
        self.active
            .send_message(chat_id, text)
            .await
            .with_context(|| format!("failed to reply in {}", chat_id))
    }
}

#[async_trait]
impl CommandEngine for Commander {
    async fn run_command(&self, message: &NormalizedMessage) -> anyhow::Result<()> {
        let command = match self.parse(&message.text) {
            Ok(command) => command,
            Err(CommandParseError::NotForBot) => return Ok(()),
            Err(CommandParseError::InvalidCommand(reply)) => {
                debug!("invalid command from {}: {}", message.sender, message.text);
                return self.reply(&message.chat_id, &reply).await;
            }
        };

        info!("run {:?} for {} in {}", command, message.sender, message.chat_id);
        let context = self.create_context(message).await;
        let result = self.parse_command(&command, &context);
        self.reply(&message.chat_id, &result.response).await
    }
}
