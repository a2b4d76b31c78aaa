use log::debug;

use crate::commands::{CommandContext, CommandResult, responses::format_whoami};

/// Describes the sender and the chat of the command.
pub fn handle_whoami(context: &CommandContext) -> CommandResult {
    debug!("handling whoami command");

    CommandResult {
        response: format_whoami(
            &context.sender,
            context.sender_name.as_deref(),
            context.chat_kind,
            context.group_subject.as_deref(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChatKind;

    #[test]
    fn test_handle_whoami_in_group() {
        let context = CommandContext {
            groups: vec![],
            chat_id: "team@g".to_string(),
            chat_kind: ChatKind::Group,
            group_subject: Some("Team".to_string()),
            sender: "bob@s".to_string(),
            sender_name: Some("Bob".to_string()),
        };

        let result = handle_whoami(&context);

        assert_eq!(result.response, "You are *Bob* (bob@s), in the group *Team*.");
    }
}
