//! Inbound event units delivered by a transport.
//!
//! A transport delivers its events as [`EventUnit`]s: bundles of zero or more named
//! event kinds that happened together. A single unit may carry a connection change
//! and a credential rotation at the same time, so consumers must look at every kind
//! in the unit instead of matching on one.
//!
//! Unknown event kinds are ignored on deserialization, which keeps older builds
//! working against newer bridges.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::CredentialsUpdate;

/// One delivered bundle of event kinds, in delivery order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventUnit {
    /// Connection lifecycle change
    #[serde(
        rename = "connection.update",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_update: Option<ConnectionUpdate>,
    /// Partial credentials rotated by the transport
    #[serde(
        rename = "creds.update",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub credentials_update: Option<CredentialsUpdate>,
    /// New messages, live or replayed
    #[serde(
        rename = "messages.upsert",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub messages_upsert: Option<MessageBatch>,
    /// Contacts discovered by the transport
    #[serde(
        rename = "contacts.upsert",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub contacts_upsert: Option<Vec<Contact>>,
    /// Contacts changed by the remote side
    #[serde(
        rename = "contacts.update",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub contacts_update: Option<Vec<Contact>>,
    /// Groups the account joined
    #[serde(
        rename = "groups.upsert",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub groups_upsert: Option<Vec<GroupMetadata>>,
    /// Groups whose metadata changed
    #[serde(
        rename = "groups.update",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub groups_update: Option<Vec<GroupMetadata>>,
}

impl EventUnit {
    /// Builds a unit carrying only a close transition with the given reason.
    pub fn closed(reason: DisconnectReason) -> Self {
        EventUnit {
            connection_update: Some(ConnectionUpdate {
                connection: Some(ConnectionPhase::Close),
                status_code: Some(reason.status_code()),
                qr: None,
            }),
            ..Default::default()
        }
    }

    /// Returns `true` when the unit carries no recognized event kind.
    pub fn is_empty(&self) -> bool {
        self.connection_update.is_none()
            && self.credentials_update.is_none()
            && self.messages_upsert.is_none()
            && self.contacts_upsert.is_none()
            && self.contacts_update.is_none()
            && self.groups_upsert.is_none()
            && self.groups_update.is_none()
    }
}

/// Connection lifecycle phase reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Close,
}

/// A connection state change, with the disconnect status when closing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionUpdate {
    #[serde(default)]
    pub connection: Option<ConnectionPhase>,
    /// Status code of the last disconnect, only meaningful on close
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Pairing payload to show to the operator when the account is not linked yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
}

impl ConnectionUpdate {
    /// Classifies the disconnect carried by this update.
    ///
    /// A close without status code is treated as a plain connection close.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        self.status_code
            .map(DisconnectReason::from_status_code)
            .unwrap_or(DisconnectReason::ConnectionClosed)
    }
}

/// Why a connection closed.
///
/// Only [`DisconnectReason::LoggedOut`] is permanent: the account credentials were
/// revoked and cannot heal by themselves. Every other reason is transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    LoggedOut,
    Forbidden,
    ConnectionLost,
    MultideviceMismatch,
    ConnectionClosed,
    ConnectionReplaced,
    BadSession,
    Unavailable,
    RestartRequired,
    Unknown(u16),
}

impl DisconnectReason {
    pub fn from_status_code(code: u16) -> Self {
        match code {
            401 => DisconnectReason::LoggedOut,
            403 => DisconnectReason::Forbidden,
            408 => DisconnectReason::ConnectionLost,
            411 => DisconnectReason::MultideviceMismatch,
            428 => DisconnectReason::ConnectionClosed,
            440 => DisconnectReason::ConnectionReplaced,
            500 => DisconnectReason::BadSession,
            503 => DisconnectReason::Unavailable,
            515 => DisconnectReason::RestartRequired,
            other => DisconnectReason::Unknown(other),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            DisconnectReason::LoggedOut => 401,
            DisconnectReason::Forbidden => 403,
            DisconnectReason::ConnectionLost => 408,
            DisconnectReason::MultideviceMismatch => 411,
            DisconnectReason::ConnectionClosed => 428,
            DisconnectReason::ConnectionReplaced => 440,
            DisconnectReason::BadSession => 500,
            DisconnectReason::Unavailable => 503,
            DisconnectReason::RestartRequired => 515,
            DisconnectReason::Unknown(code) => *code,
        }
    }

    /// Returns `true` when the account is permanently unauthenticated.
    pub fn is_permanent(&self) -> bool {
        matches!(self, DisconnectReason::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisconnectReason::LoggedOut => "logged out",
            DisconnectReason::Forbidden => "forbidden",
            DisconnectReason::ConnectionLost => "connection lost",
            DisconnectReason::MultideviceMismatch => "multi-device mismatch",
            DisconnectReason::ConnectionClosed => "connection closed",
            DisconnectReason::ConnectionReplaced => "connection replaced",
            DisconnectReason::BadSession => "bad session",
            DisconnectReason::Unavailable => "service unavailable",
            DisconnectReason::RestartRequired => "restart required",
            DisconnectReason::Unknown(_) => "unknown",
        };
        write!(f, "{} ({})", name, self.status_code())
    }
}

/// Tag telling live notifications apart from history replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    /// Messages received live
    Notify,
    /// Messages replayed from history
    Append,
}

/// A batch of inbound messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBatch {
    #[serde(rename = "type")]
    pub kind: BatchKind,
    #[serde(default)]
    pub messages: Vec<RawMessage>,
}

/// A chat message as delivered by the transport, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: String,
    /// Chat the message belongs to
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Author inside a group chat
    #[serde(default)]
    pub participant: Option<String>,
    /// Whether the chat is a group
    #[serde(default)]
    pub group: bool,
    /// Whether the message was sent by the account itself
    #[serde(default)]
    pub from_me: bool,
    /// Seconds since the Unix epoch
    #[serde(default)]
    pub timestamp: u64,
    /// Display name chosen by the author
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Member of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    /// `admin` or `superadmin` when the participant has elevated rights
    #[serde(default)]
    pub admin: Option<String>,
}

/// Roster metadata of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Creation time in seconds since the Unix epoch
    #[serde(default)]
    pub creation: Option<u64>,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

/// A contact known to the account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    /// Name saved in the address book
    #[serde(default)]
    pub name: Option<String>,
    /// Name chosen by the contact
    #[serde(default)]
    pub notify: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_unit_with_several_kinds() {
        let json = r#"{
            "connection.update": {"connection": "close", "status_code": 428},
            "creds.update": {"identity": "bot@example"},
            "messages.upsert": {"type": "notify", "messages": [{"id": "m1", "chat_id": "c1", "text": "hi"}]}
        }"#;

        let unit: EventUnit = serde_json::from_str(json).unwrap();

        let update = unit.connection_update.unwrap();
        assert_eq!(update.connection, Some(ConnectionPhase::Close));
        assert_eq!(
            update.disconnect_reason(),
            DisconnectReason::ConnectionClosed
        );
        assert_eq!(
            unit.credentials_update.unwrap().identity.as_deref(),
            Some("bot@example")
        );
        let batch = unit.messages_upsert.unwrap();
        assert_eq!(batch.kind, BatchKind::Notify);
        assert_eq!(batch.messages[0].text.as_deref(), Some("hi"));
    }

    #[test]
    fn test_unknown_kinds_are_ignored() {
        let json = r#"{"presence.update": {"id": "x"}, "call": [1, 2]}"#;
        let unit: EventUnit = serde_json::from_str(json).unwrap();
        assert!(unit.is_empty());
    }

    #[test]
    fn test_disconnect_reason_codes() {
        for code in [401, 403, 408, 411, 428, 440, 500, 503, 515, 999] {
            assert_eq!(DisconnectReason::from_status_code(code).status_code(), code);
        }
        assert_eq!(
            DisconnectReason::from_status_code(999),
            DisconnectReason::Unknown(999)
        );
    }

    #[test]
    fn test_only_logged_out_is_permanent() {
        assert!(DisconnectReason::LoggedOut.is_permanent());
        assert!(!DisconnectReason::ConnectionReplaced.is_permanent());
        assert!(!DisconnectReason::BadSession.is_permanent());
        assert!(!DisconnectReason::Unknown(0).is_permanent());
    }

    #[test]
    fn test_close_without_status_code() {
        let update = ConnectionUpdate {
            connection: Some(ConnectionPhase::Close),
            status_code: None,
            qr: None,
        };
        assert_eq!(
            update.disconnect_reason(),
            DisconnectReason::ConnectionClosed
        );
    }

    #[test]
    fn test_closed_unit() {
        let unit = EventUnit::closed(DisconnectReason::ConnectionLost);
        let update = unit.connection_update.unwrap();
        assert_eq!(update.connection, Some(ConnectionPhase::Close));
        assert_eq!(update.disconnect_reason(), DisconnectReason::ConnectionLost);
    }
}
