//! Reply formatters for bot commands.
//!
//! Replies are plain text with the light markup chat clients render: `*bold*`
//! and backquoted code.

use crate::{events::ChatKind, transport::GroupMetadata};

/// Formats the help message showing available bot commands.
///
/// # Examples
///
/// ```ignore
/// # use ronron::commands::responses::format_help;
/// let help = format_help("ronron");
/// assert!(help.contains("Commands:"));
/// ```
pub fn format_help(prefix: &str) -> String {
    format!(
        "Commands:\n\
        - `!{prefix} ping`: check that the bot is alive\n\
        - `!{prefix} groups`: list the groups the account is in\n\
        - `!{prefix} whoami`: show who you are for the bot\n\
        - `!{prefix} help`: show this help message"
    )
}

pub fn format_unknown_command(prefix: &str) -> String {
    format!("Unknown command. Type `!{} help` for more information.", prefix)
}

pub fn format_pong() -> String {
    "pong".to_owned()
}

/// Formats the list of cached groups, one line per group.
pub fn format_groups(groups: &[GroupMetadata]) -> String {
    if groups.is_empty() {
        return "No known groups.".to_owned();
    }

    let lines = groups
        .iter()
        .map(|group| {
            let subject = match group.subject.is_empty() {
                true => group.id.as_str(),
                false => group.subject.as_str(),
            };
            format!(
                "- *{}* ({} participants)",
                subject,
                group.participants.len()
            )
        })
        .collect::<Vec<String>>()
        .join("\n");

    format!("Groups:\n{}", lines)
}

/// Formats what the bot knows about the sender and the chat.
pub fn format_whoami(
    sender: &str,
    sender_name: Option<&str>,
    chat_kind: ChatKind,
    group_subject: Option<&str>,
) -> String {
    let who = match sender_name {
        Some(name) => format!("You are *{}* ({})", name, sender),
        None => format!("You are {}", sender),
    };
    let chat = match (chat_kind, group_subject) {
        (ChatKind::Direct, _) => "in a direct chat".to_owned(),
        (ChatKind::Group, Some(subject)) => format!("in the group *{}*", subject),
        (ChatKind::Group, None) => "in a group".to_owned(),
    };

    format!("{}, {}.", who, chat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Participant;

    #[test]
    fn test_format_help_uses_prefix() {
        let help = format_help("bot");
        assert!(help.contains("`!bot ping`"));
        assert!(help.contains("`!bot help`"));
    }

    #[test]
    fn test_format_unknown_command() {
        let message = format_unknown_command("ronron");
        assert!(message.contains("Unknown command"));
        assert!(message.contains("!ronron"));
    }

    #[test]
    fn test_format_groups_empty() {
        assert_eq!(format_groups(&[]), "No known groups.");
    }

    #[test]
    fn test_format_groups() {
        let groups = vec![
            GroupMetadata {
                id: "a@g".to_string(),
                subject: "Alpha".to_string(),
                participants: vec![
                    Participant {
                        id: "bob@s".to_string(),
                        admin: None,
                    },
                    Participant {
                        id: "carol@s".to_string(),
                        admin: Some("admin".to_string()),
                    },
                ],
                ..Default::default()
            },
            GroupMetadata {
                id: "b@g".to_string(),
                ..Default::default()
            },
        ];

        assert_eq!(
            format_groups(&groups),
            "Groups:\n- *Alpha* (2 participants)\n- *b@g* (0 participants)"
        );
    }

    #[test]
    fn test_format_whoami() {
        assert_eq!(
            format_whoami("bob@s", Some("Bob"), ChatKind::Group, Some("Team")),
            "You are *Bob* (bob@s), in the group *Team*."
        );
        assert_eq!(
            format_whoami("bob@s", None, ChatKind::Direct, None),
            "You are bob@s, in a direct chat."
        );
        assert_eq!(
            format_whoami("bob@s", None, ChatKind::Group, None),
            "You are bob@s, in a group."
        );
    }
}
