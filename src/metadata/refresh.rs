//! Periodic refresh of the group roster.
//!
//! This module provides the [`MetadataRefresher`], a background task that fetches
//! every group from the open session at a fixed interval and upserts the result
//! into the [`MetadataCache`]. A refresh can also be requested on demand through
//! the [`Notify`] handle returned by [`MetadataRefresher::trigger`], which the
//! supervisor uses each time a session opens.
//!
//! Failures never stop the loop: a tick without open session is skipped and a
//! failed fetch is logged, the next tick tries again.

use std::{sync::Arc, time::Duration};

use log::{debug, error, info};
use tokio::{
    sync::Notify,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use crate::{
    metadata::MetadataCache,
    session::ActiveSession,
    store::GroupStore,
    transport::TransportError,
    utils::now_millis,
};

/// Background task keeping the group roster fresh.
///
/// # Examples
///
/// ```ignore
/// # use std::{sync::Arc, time::Duration};
/// # use ronron::metadata::{MetadataCache, MetadataRefresher};
/// # use ronron::session::ActiveSession;
/// # async fn example() {
/// let cache = Arc::new(MetadataCache::new());
/// let active = ActiveSession::new(Arc::clone(&cache));
/// let refresher = MetadataRefresher::new(active, Duration::from_secs(300), None);
/// let trigger = refresher.trigger();
/// let handle = refresher.start();
///
/// // Refresh now instead of waiting for the next tick
/// trigger.notify_one();
/// # }
/// ```
pub struct MetadataRefresher {
    active: ActiveSession,
    cache: Arc<MetadataCache>,
    interval: Duration,
    trigger: Arc<Notify>,
    store: Option<GroupStore>,
}

impl MetadataRefresher {
    /// Creates a refresher.
    ///
    /// # Arguments
    ///
    /// * `active` - handle on the open session, also gives the cache to fill
    /// * `interval` - delay between two refreshes
    /// * `store` - snapshot written after each successful refresh, if any
    pub fn new(active: ActiveSession, interval: Duration, store: Option<GroupStore>) -> Self {
        let cache = active.cache();
        MetadataRefresher {
            active,
            cache,
            interval,
            trigger: Arc::new(Notify::new()),
            store,
        }
    }

    /// Handle to request an immediate refresh.
    pub fn trigger(&self) -> Arc<Notify> {
        Arc::clone(&self.trigger)
    }

    /// Spawns the refresh loop.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        info!("refresh group metadata every {:?}", self.interval);
        let mut interval = time::interval_at(Instant::now() + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => debug!("scheduled metadata refresh"),
                _ = self.trigger.notified() => debug!("requested metadata refresh"),
            }

            match self.refresh().await {
                Ok(count) => info!(
                    "refreshed {} groups, {} in cache",
                    count,
                    self.cache.group_count()
                ),
                Err(TransportError::NotConnected) => debug!("no open session, skip refresh"),
                Err(e) => error!("failed to refresh group metadata: {}", e),
            }
        }
    }

    /// Fetches every group once and upserts it into the cache.
    ///
    /// Entries are stamped with the time the fetch started, so update events
    /// received while the fetch was running are not overwritten.
    ///
    /// # Returns
    ///
    /// The number of fetched groups.
    pub async fn refresh(&self) -> Result<usize, TransportError> {
        let transport = self
            .active
            .current()
            .await
            .ok_or(TransportError::NotConnected)?;

        let observed_at = now_millis();
        let groups = transport.fetch_all_groups().await?;
        let count = groups.len();

        for (id, mut group) in groups {
            if group.id.is_empty() {
                group.id = id;
            }
            self.cache.upsert_group(group, observed_at);
        }

        if let Some(store) = &self.store {
            store.persist(self.cache.group_snapshot()).await;
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::store::Database;
    use crate::transport::{GroupMetadata, MockTransport};
    use tempfile::TempDir;

    fn create_group(id: &str, subject: &str) -> GroupMetadata {
        GroupMetadata {
            id: id.to_string(),
            subject: subject.to_string(),
            ..Default::default()
        }
    }

    fn create_transport(groups: Vec<GroupMetadata>) -> MockTransport {
        let mut transport = MockTransport::new();
        transport.expect_fetch_all_groups().returning(move || {
            Ok(groups
                .iter()
                .map(|g| (g.id.clone(), g.clone()))
                .collect::<HashMap<_, _>>())
        });
        transport
    }

    #[tokio::test]
    async fn test_refresh_fills_cache() {
        let cache = Arc::new(MetadataCache::new());
        let active = ActiveSession::new(Arc::clone(&cache));
        active
            .install(Arc::new(create_transport(vec![
                create_group("a@g", "v1"),
                create_group("b@g", "v2"),
            ])))
            .await;
        let refresher = MetadataRefresher::new(active, Duration::from_secs(300), None);

        assert_eq!(refresher.refresh().await.unwrap(), 2);

        assert_eq!(cache.group_count(), 2);
        assert_eq!(cache.group("a@g").unwrap().subject, "v1");
        assert_eq!(cache.group("b@g").unwrap().subject, "v2");
    }

    #[tokio::test]
    async fn test_refresh_without_session_is_skipped() {
        let active = ActiveSession::new(Arc::new(MetadataCache::new()));
        let refresher = MetadataRefresher::new(active, Duration::from_secs(300), None);

        assert!(matches!(
            refresher.refresh().await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_cache() {
        let cache = Arc::new(MetadataCache::new());
        cache.upsert_group(create_group("a@g", "Alpha"), 1);
        let active = ActiveSession::new(Arc::clone(&cache));
        let mut transport = MockTransport::new();
        transport
            .expect_fetch_all_groups()
            .returning(|| Err(TransportError::Timeout(1)));
        active.install(Arc::new(transport)).await;
        let refresher = MetadataRefresher::new(active, Duration::from_secs(300), None);

        assert!(refresher.refresh().await.is_err());

        assert_eq!(cache.group("a@g").unwrap().subject, "Alpha");
    }

    #[tokio::test]
    async fn test_missing_id_is_taken_from_key() {
        let cache = Arc::new(MetadataCache::new());
        let active = ActiveSession::new(Arc::clone(&cache));
        let mut transport = MockTransport::new();
        transport.expect_fetch_all_groups().returning(|| {
            let mut groups = HashMap::new();
            groups.insert("a@g".to_string(), create_group("", "Alpha"));
            Ok(groups)
        });
        active.install(Arc::new(transport)).await;
        let refresher = MetadataRefresher::new(active, Duration::from_secs(300), None);

        refresher.refresh().await.unwrap();

        assert_eq!(cache.group("a@g").unwrap().id, "a@g");
    }

    #[tokio::test]
    async fn test_refresh_persists_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = GroupStore::new(Database::open(dir.path().join("ronron.db")).await.unwrap());
        let active = ActiveSession::new(Arc::new(MetadataCache::new()));
        active
            .install(Arc::new(create_transport(vec![create_group("a@g", "Alpha")])))
            .await;
        let refresher =
            MetadataRefresher::new(active, Duration::from_secs(300), Some(store.clone()));

        refresher.refresh().await.unwrap();

        let snapshot = store.load().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, create_group("a@g", "Alpha"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_refreshes_on_tick_and_on_demand() {
        let cache = Arc::new(MetadataCache::new());
        let active = ActiveSession::new(Arc::clone(&cache));
        let refresher = MetadataRefresher::new(active.clone(), Duration::from_secs(300), None);
        let trigger = refresher.trigger();
        let handle = refresher.start();

        // First refresh on demand
        active
            .install(Arc::new(create_transport(vec![create_group("a@g", "v1")])))
            .await;
        trigger.notify_one();
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cache.group("a@g").unwrap().subject, "v1");

        // Next one on the scheduled tick
        active
            .install(Arc::new(create_transport(vec![create_group("a@g", "v2")])))
            .await;
        time::sleep(Duration::from_secs(300)).await;
        assert_eq!(cache.group("a@g").unwrap().subject, "v2");

        handle.abort();
    }
}
