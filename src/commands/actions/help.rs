use log::debug;

use crate::commands::{CommandResult, responses::format_help};

/// Returns the list of available commands.
pub fn handle_help(prefix: &str) -> CommandResult {
    debug!("handling help command");

    CommandResult {
        response: format_help(prefix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_help() {
        let result = handle_help("ronron");

        assert!(result.response.starts_with("Commands:"));
    }
}
