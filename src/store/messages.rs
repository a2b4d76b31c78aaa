use async_trait::async_trait;
use log::debug;
use rusqlite::params;

use crate::{
    events::{ChatKind, MessageRecorder, NormalizedMessage},
    store::{Database, StoreError},
    utils::now_millis,
};

/// Records every dispatched message in the `messages` table.
///
/// Rows are keyed by chat and message id, a redelivered message overwrites its
/// previous row.
#[derive(Clone)]
pub struct MessageLog {
    database: Database,
}

impl MessageLog {
    pub fn new(database: Database) -> Self {
        MessageLog { database }
    }

    async fn upsert(&self, message: &NormalizedMessage) -> Result<(), StoreError> {
        let message = message.clone();
        let recorded_at = now_millis();

        self.database
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO messages
                        (chat_id, id, sender, sender_name, from_me, is_group, timestamp, text, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(chat_id, id) DO UPDATE SET
                        sender = excluded.sender,
                        sender_name = excluded.sender_name,
                        from_me = excluded.from_me,
                        is_group = excluded.is_group,
                        timestamp = excluded.timestamp,
                        text = excluded.text,
                        recorded_at = excluded.recorded_at",
                    params![
                        message.chat_id,
                        message.id,
                        message.sender,
                        message.sender_name,
                        message.from_me,
                        message.chat_kind == ChatKind::Group,
                        message.timestamp as i64,
                        message.text,
                        recorded_at as i64,
                    ],
                )?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl MessageRecorder for MessageLog {
    async fn record_message(&self, message: &NormalizedMessage) -> anyhow::Result<()> {
        self.upsert(message).await?;
        debug!("recorded message {} of {}", message.id, message.chat_id);
        Ok(())
    }
}
