//! Command parsing.
//!
//! Converts message text into a structured [`Command`].

use command_parser::Parser;
use log::debug;

use crate::commands::responses::format_unknown_command;

/// Represents a parsed bot command.
#[derive(Debug, Hash, PartialEq, Eq)]
pub enum Command {
    /// Display help information
    Help,
    /// Liveness check
    Ping,
    /// List cached groups
    Groups,
    /// Describe the sender and the chat
    Whoami,
}

/// Errors that can occur during command parsing.
#[derive(Debug)]
pub enum CommandParsingError {
    /// The message could not be parsed as a command
    UnableToParse,
    /// The command is for another bot (wrong prefix)
    OtherBot,
    /// The command is not recognized
    Unknown,
}

impl Command {
    /// Parses a message string into a Command.
    ///
    /// # Arguments
    ///
    /// * `parser` - The command parser instance configured for the bot
    /// * `prefix` - Command name the bot answers to
    /// * `body` - The message text to parse
    ///
    /// # Errors
    ///
    /// - The message is not a command format - [`CommandParsingError::UnableToParse`]
    /// - The command is for a different bot - [`CommandParsingError::OtherBot`]
    /// - The command is not recognized - [`CommandParsingError::Unknown`]
    pub fn parse(parser: &Parser, prefix: &str, body: &str) -> Result<Self, CommandParsingError> {
        // The parser drops the last word, so a dummy word is appended
        let body = body.to_string() + " dummy";

        // Failing is expected when the message is not a command
        let command = match parser.parse(&body) {
            Ok(cmd) => cmd,
            Err(_) => return Err(CommandParsingError::UnableToParse),
        };

        if command.name != prefix {
            return Err(CommandParsingError::OtherBot);
        }

        debug!("parsing command: {:?}", command);

        // If no arguments, return help
        if command.arguments.is_empty() {
            return Ok(Command::Help);
        }

        match command.arguments[0].as_str() {
            "help" => Ok(Command::Help),
            "ping" => Ok(Command::Ping),
            "groups" => Ok(Command::Groups),
            "whoami" => Ok(Command::Whoami),
            _ => Err(CommandParsingError::Unknown),
        }
    }
}

/// Formats a command error into a reply.
///
/// # Returns
///
/// * `Some(String)` - A reply for errors the user should see
/// * `None` - For messages that should not produce a reply
pub fn format_command_error(error: CommandParsingError, prefix: &str) -> Option<String> {
    match error {
        CommandParsingError::Unknown => Some(format_unknown_command(prefix)),
        CommandParsingError::UnableToParse | CommandParsingError::OtherBot => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_parser() -> Parser {
        Parser::new('!', '-')
    }

    #[test]
    fn test_parse_help_command() {
        let parser = create_parser();
        let result = Command::parse(&parser, "ronron", "!ronron help");
        assert!(matches!(result, Ok(Command::Help)));
    }

    #[test]
    fn test_parse_help_command_no_args() {
        let parser = create_parser();
        let result = Command::parse(&parser, "ronron", "!ronron");
        assert!(matches!(result, Ok(Command::Help)));
    }

    #[test]
    fn test_parse_ping_command() {
        let parser = create_parser();
        let result = Command::parse(&parser, "ronron", "!ronron ping");
        assert!(matches!(result, Ok(Command::Ping)));
    }

    #[test]
    fn test_parse_groups_command() {
        let parser = create_parser();
        let result = Command::parse(&parser, "ronron", "!ronron groups");
        assert!(matches!(result, Ok(Command::Groups)));
    }

    #[test]
    fn test_parse_whoami_command() {
        let parser = create_parser();
        let result = Command::parse(&parser, "ronron", "!ronron whoami");
        assert!(matches!(result, Ok(Command::Whoami)));
    }

    #[test]
    fn test_parse_with_custom_prefix() {
        let parser = create_parser();
        assert!(matches!(
            Command::parse(&parser, "bot", "!bot ping"),
            Ok(Command::Ping)
        ));
        assert!(matches!(
            Command::parse(&parser, "bot", "!ronron ping"),
            Err(CommandParsingError::OtherBot)
        ));
    }

    #[test]
    fn test_parse_unknown_command() {
        let parser = create_parser();
        let result = Command::parse(&parser, "ronron", "!ronron dance");
        assert!(matches!(result, Err(CommandParsingError::Unknown)));
    }

    #[test]
    fn test_parse_other_bot_command() {
        let parser = create_parser();
        let result = Command::parse(&parser, "ronron", "!otherbot help");
        assert!(matches!(result, Err(CommandParsingError::OtherBot)));
    }

    #[test]
    fn test_parse_unable_to_parse() {
        let parser = create_parser();
        let result = Command::parse(&parser, "ronron", "This is not a command");
        assert!(matches!(result, Err(CommandParsingError::UnableToParse)));
    }

    #[test]
    fn test_format_command_error_unknown() {
        let result = format_command_error(CommandParsingError::Unknown, "ronron");
        assert!(result.unwrap().contains("Unknown command"));
    }

    #[test]
    fn test_format_command_error_silent() {
        assert!(format_command_error(CommandParsingError::UnableToParse, "ronron").is_none());
        assert!(format_command_error(CommandParsingError::OtherBot, "ronron").is_none());
    }
}
