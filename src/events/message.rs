use thiserror::Error;

use crate::{metadata::MetadataCache, transport::RawMessage};

/// Kind of chat a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Direct,
    Group,
}

/// A message resolved against the account and the metadata cache.
///
/// This is what the command engine and the message recorder receive.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessage {
    pub id: String,
    pub chat_id: String,
    pub chat_kind: ChatKind,
    /// Author of the message
    pub sender: String,
    /// Display name of the author, when known
    pub sender_name: Option<String>,
    pub from_me: bool,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
    /// Text content, empty for media without caption
    pub text: String,
    /// Subject of the group, when the chat is a cached group
    pub group_subject: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("message {0} has no chat id")]
    MissingChat(String),
    #[error("message {0} has no resolvable sender")]
    MissingSender(String),
}

/// Resolves sender, chat kind and group subject of a raw message.
///
/// # Arguments
///
/// * `raw` - message as delivered by the transport
/// * `own_identity` - identity of the account, author of `from_me` messages
/// * `cache` - source of group subjects and contact names
///
/// # Errors
///
/// Fails when the chat id is missing, or when the author cannot be determined:
/// a group message without participant, or an own message while the account
/// identity is unknown.
pub fn normalize(
    raw: RawMessage,
    own_identity: Option<&str>,
    cache: &MetadataCache,
) -> Result<NormalizedMessage, NormalizeError> {
    let Some(chat_id) = raw.chat_id.filter(|id| !id.is_empty()) else {
        return Err(NormalizeError::MissingChat(raw.id));
    };

    let chat_kind = match raw.group {
        true => ChatKind::Group,
        false => ChatKind::Direct,
    };

    let sender = match (raw.from_me, chat_kind) {
        (true, _) => own_identity.map(str::to_owned),
        (false, ChatKind::Group) => raw.participant.clone(),
        (false, ChatKind::Direct) => Some(chat_id.clone()),
    };
    let Some(sender) = sender else {
        return Err(NormalizeError::MissingSender(raw.id));
    };

    let sender_name = raw
        .push_name
        .filter(|name| !name.is_empty())
        .or_else(|| cache.contact_name(&sender));

    let group_subject = match chat_kind {
        ChatKind::Group => cache.group(&chat_id).map(|group| group.subject),
        ChatKind::Direct => None,
    };

    Ok(NormalizedMessage {
        id: raw.id,
        chat_id,
        chat_kind,
        sender,
        sender_name,
        from_me: raw.from_me,
        timestamp: raw.timestamp,
        text: raw.text.unwrap_or_default(),
        group_subject,
    })
}
