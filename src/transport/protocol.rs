//! Line protocol spoken with the bridge process.
//!
//! Each message is one JSON object on its own line, tagged by its `type` field.
//! Commands go to the bridge stdin, events come back on its stdout.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    store::{Credentials, KeyChange},
    transport::events::{EventUnit, GroupMetadata},
};

/// Message written to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// First command of every connection
    Start { credentials: Option<Credentials> },
    SendMessage {
        request_id: u64,
        recipient: String,
        text: String,
    },
    FetchAllGroups { request_id: u64 },
    FetchGroup { request_id: u64, group_id: String },
    /// Answer to [`BridgeEvent::KeysGet`]
    KeysResult {
        request_id: u64,
        keys: HashMap<String, Value>,
    },
    /// Answer to [`BridgeEvent::GroupMetadataRequest`]
    GroupMetadata {
        request_id: u64,
        metadata: Option<GroupMetadata>,
    },
    Shutdown,
}

/// Message read from the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    Events {
        unit: EventUnit,
    },
    /// Outcome of a request sent with a `request_id`
    Response {
        request_id: u64,
        ok: bool,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
    },
    KeysGet {
        request_id: u64,
        category: String,
        ids: Vec<String>,
    },
    KeysSet {
        changes: Vec<KeyChange>,
    },
    GroupMetadataRequest {
        request_id: u64,
        group_id: String,
    },
}

impl BridgeCommand {
    /// Encodes the command as one protocol line, newline included.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
