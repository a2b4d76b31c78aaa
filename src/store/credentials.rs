use std::collections::HashMap;

use async_trait::async_trait;
use log::{debug, info};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    store::{Database, KeyStore, StoreError},
    utils::now_millis,
};

/// Row name of the credentials entry.
const CREDENTIALS_NAME: &str = "session";

/// Authentication material of the account.
///
/// Only the account identity is interpreted by this crate. Everything else is
/// transport-specific material kept verbatim and handed back to the transport on
/// the next connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    /// Identity of the account once it is linked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Opaque transport material
    #[serde(flatten)]
    pub material: Map<String, Value>,
}

/// Partial credentials emitted by the transport when it rotates material.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(flatten)]
    pub material: Map<String, Value>,
}

impl Credentials {
    /// Merges a partial update field by field.
    ///
    /// Fields absent from the update keep their current value.
    pub fn apply(&mut self, update: &CredentialsUpdate) {
        if let Some(identity) = &update.identity {
            self.identity = Some(identity.clone());
        }
        for (key, value) in &update.material {
            self.material.insert(key.clone(), value.clone());
        }
    }
}

/// One key material change. A `None` value deletes the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyChange {
    pub category: String,
    pub id: String,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Persists credentials and key material.
///
/// The session handler inside the event loop is the only writer of credentials,
/// session construction reads them. Every write is a single SQLite transaction, so
/// the next [`CredentialStore::load`] sees either the full new value or the
/// previous one.
#[derive(Clone)]
pub struct CredentialStore {
    database: Database,
}

impl CredentialStore {
    pub fn new(database: Database) -> Self {
        CredentialStore { database }
    }

    /// Loads the persisted credentials.
    ///
    /// # Returns
    ///
    /// `None` when the account was never linked.
    pub async fn load(&self) -> Result<Option<Credentials>, StoreError> {
        let value: Option<String> = self
            .database
            .call(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT value FROM credentials WHERE name = ?1",
                        params![CREDENTIALS_NAME],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;

        let Some(value) = value else {
            debug!("no stored credentials");
            return Ok(None);
        };

        let credentials: Credentials = serde_json::from_str(&value)?;
        debug!(
            "loaded credentials for {}",
            credentials.identity.as_deref().unwrap_or("unlinked account")
        );
        Ok(Some(credentials))
    }

    /// Replaces the persisted credentials with `credentials`.
    pub async fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        let value = serde_json::to_string(credentials)?;
        let updated_at = now_millis();

        self.database
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO credentials (name, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    params![CREDENTIALS_NAME, value, updated_at as i64],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        debug!("credentials saved");
        Ok(())
    }
}

#[async_trait]
impl KeyStore for CredentialStore {
    async fn get_keys(
        &self,
        category: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Value>, StoreError> {
        let category = category.to_owned();
        let ids = ids.to_vec();

        self.database
            .call(move |conn| {
                let mut statement =
                    conn.prepare_cached("SELECT value FROM keys WHERE category = ?1 AND id = ?2")?;
                let mut keys = HashMap::new();
                for id in ids {
                    let value: Option<String> = statement
                        .query_row(params![category, id], |row| row.get(0))
                        .optional()?;
                    if let Some(value) = value {
                        keys.insert(id, serde_json::from_str(&value)?);
                    }
                }
                Ok(keys)
            })
            .await
    }

    async fn set_keys(&self, changes: Vec<KeyChange>) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }

        // Serialize before opening the transaction so a bad value aborts nothing
        let rows = changes
            .into_iter()
            .map(|change| -> Result<_, StoreError> {
                let value = change.value.map(|v| serde_json::to_string(&v)).transpose()?;
                Ok((change.category, change.id, value))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        let count = rows.len();

        self.database
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (category, id, value) in rows {
                    match value {
                        Some(value) => tx.execute(
                            "INSERT INTO keys (category, id, value) VALUES (?1, ?2, ?3)
                             ON CONFLICT(category, id) DO UPDATE SET value = excluded.value",
                            params![category, id, value],
                        )?,
                        None => tx.execute(
                            "DELETE FROM keys WHERE category = ?1 AND id = ?2",
                            params![category, id],
                        )?,
                    };
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        info!("stored {} key changes", count);
        Ok(())
    }
}
