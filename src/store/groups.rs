//! Snapshot of the group roster, reloaded at startup.
//!
//! Loading and persisting never fail the caller: a broken snapshot only costs a
//! cold cache until the next refresh.

use log::{error, info, warn};
use rusqlite::params;

use crate::{
    store::{Database, StoreError},
    transport::GroupMetadata,
};

/// Loads and persists group metadata with its observation time.
///
/// # Examples
///
/// ```ignore
/// # use ronron::store::{Database, GroupStore};
/// # async fn example(database: Database) {
/// let store = GroupStore::new(database);
/// let groups = store.load().await;
/// store.persist(groups).await;
/// # }
/// ```
#[derive(Clone)]
pub struct GroupStore {
    database: Database,
}

impl GroupStore {
    pub fn new(database: Database) -> Self {
        GroupStore { database }
    }

    /// Loads the stored groups with their observation time.
    ///
    /// Rows that cannot be deserialized are skipped with a warning. A database
    /// error returns an empty snapshot.
    pub async fn load(&self) -> Vec<(GroupMetadata, u64)> {
        let rows = match self.read_rows().await {
            Ok(rows) => rows,
            Err(e) => {
                error!("failed to load group snapshot: {}", e);
                return vec![];
            }
        };

        let groups: Vec<(GroupMetadata, u64)> = rows
            .into_iter()
            .filter_map(|(id, metadata, observed_at)| {
                match serde_json::from_str::<GroupMetadata>(&metadata) {
                    Ok(group) => Some((group, observed_at)),
                    Err(e) => {
                        warn!("ignore stored group {}: {}", id, e);
                        None
                    }
                }
            })
            .collect();

        info!("loaded {} groups from snapshot", groups.len());
        groups
    }

    /// Writes `groups` to the snapshot in one transaction.
    ///
    /// A stored row is only replaced by an entry observed at the same time or later.
    pub async fn persist(&self, groups: Vec<(GroupMetadata, u64)>) {
        let count = groups.len();
        match self.write_rows(groups).await {
            Ok(()) => info!("persisted {} groups", count),
            Err(e) => error!("failed to persist group snapshot: {}", e),
        }
    }

    async fn read_rows(&self) -> Result<Vec<(String, String, u64)>, StoreError> {
        self.database
            .call(|conn| {
                let mut statement = conn.prepare("SELECT id, metadata, observed_at FROM group_snapshot")?;
                let rows = statement
                    .query_map([], |row| {
                        let observed_at: i64 = row.get(2)?;
                        Ok((row.get(0)?, row.get(1)?, observed_at.max(0) as u64))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    async fn write_rows(&self, groups: Vec<(GroupMetadata, u64)>) -> Result<(), StoreError> {
        let rows = groups
            .into_iter()
            .map(|(group, observed_at)| -> Result<_, StoreError> {
                Ok((group.id.clone(), serde_json::to_string(&group)?, observed_at))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        self.database
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (id, metadata, observed_at) in rows {
                    tx.execute(
                        "INSERT INTO group_snapshot (id, metadata, observed_at) VALUES (?1, ?2, ?3)
                         ON CONFLICT(id) DO UPDATE SET
                            metadata = excluded.metadata,
                            observed_at = excluded.observed_at
                         WHERE excluded.observed_at >= group_snapshot.observed_at",
                        params![id, metadata, observed_at as i64],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_group(id: &str, subject: &str) -> GroupMetadata {
        GroupMetadata {
            id: id.to_string(),
            subject: subject.to_string(),
            ..Default::default()
        }
    }

    async fn create_store(dir: &TempDir) -> GroupStore {
        GroupStore::new(Database::open(dir.path().join("ronron.db")).await.unwrap())
    }

    #[tokio::test]
    async fn test_load_empty_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = create_store(&dir).await;

        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let store = create_store(&dir).await;

        store
            .persist(vec![
                (create_group("a@g", "Alpha"), 10),
                (create_group("b@g", "Beta"), 20),
            ])
            .await;

        let mut groups = store.load().await;
        groups.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        assert_eq!(
            groups,
            vec![
                (create_group("a@g", "Alpha"), 10),
                (create_group("b@g", "Beta"), 20),
            ]
        );
    }

    #[tokio::test]
    async fn test_persist_keeps_newer_row() {
        let dir = TempDir::new().unwrap();
        let store = create_store(&dir).await;

        store.persist(vec![(create_group("a@g", "Newer"), 20)]).await;
        store.persist(vec![(create_group("a@g", "Older"), 10)]).await;

        assert_eq!(store.load().await, vec![(create_group("a@g", "Newer"), 20)]);
    }

    #[tokio::test]
    async fn test_load_skips_corrupted_rows() {
        let dir = TempDir::new().unwrap();
        let store = create_store(&dir).await;
        store.persist(vec![(create_group("a@g", "Alpha"), 10)]).await;
        store
            .database
            .call(|conn| {
                conn.execute(
                    "INSERT INTO group_snapshot (id, metadata, observed_at) VALUES ('bad@g', 'not json', 1)",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(store.load().await, vec![(create_group("a@g", "Alpha"), 10)]);
    }
}
