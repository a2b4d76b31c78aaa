use std::sync::Arc;

use log::debug;
use tokio::sync::RwLock;

use crate::{
    metadata::MetadataCache,
    transport::{GroupMetadata, Transport, TransportError},
    utils::now_millis,
};

/// Handle on the transport of the currently open session.
///
/// The supervisor installs the transport when a session opens and removes it when
/// the session closes. The command engine and the refresh loop only ever talk to
/// the service through this handle, so they never hold on to a dead session.
#[derive(Clone)]
pub struct ActiveSession {
    transport: Arc<RwLock<Option<Arc<dyn Transport>>>>,
    cache: Arc<MetadataCache>,
}

impl ActiveSession {
    pub fn new(cache: Arc<MetadataCache>) -> Self {
        ActiveSession {
            transport: Arc::new(RwLock::new(None)),
            cache,
        }
    }

    pub fn cache(&self) -> Arc<MetadataCache> {
        Arc::clone(&self.cache)
    }

    pub async fn install(&self, transport: Arc<dyn Transport>) {
        *self.transport.write().await = Some(transport);
        debug!("session transport installed");
    }

    /// Removes the installed transport and returns it.
    pub async fn clear(&self) -> Option<Arc<dyn Transport>> {
        let previous = self.transport.write().await.take();
        if previous.is_some() {
            debug!("session transport removed");
        }
        previous
    }

    pub async fn current(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().await.clone()
    }

    /// Sends a text message through the open session.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`] when no session is open.
    pub async fn send_message(&self, recipient: &str, text: &str) -> Result<(), TransportError> {
        let transport = self.current().await.ok_or(TransportError::NotConnected)?;
        transport.send_message(recipient, text).await
    }

    /// Returns the metadata of a group.
    ///
    /// Served from the cache when present, otherwise fetched through the open
    /// session and written to the cache.
    pub async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata, TransportError> {
        if let Some(group) = self.cache.group(group_id) {
            return Ok(group);
        }

        let transport = self.current().await.ok_or(TransportError::NotConnected)?;
        let observed_at = now_millis();
        let group = transport.fetch_group(group_id).await?;
        debug!("fetched metadata of {}", group_id);
        self.cache.upsert_group(group.clone(), observed_at);

        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use mockall::predicate::eq;

    fn create_group(id: &str, subject: &str) -> GroupMetadata {
        GroupMetadata {
            id: id.to_string(),
            subject: subject.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_without_session() {
        let active = ActiveSession::new(Arc::new(MetadataCache::new()));

        let result = active.send_message("alice@s", "hello").await;

        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_send_through_installed_transport() {
        let active = ActiveSession::new(Arc::new(MetadataCache::new()));
        let mut transport = MockTransport::new();
        transport
            .expect_send_message()
            .with(eq("alice@s"), eq("hello"))
            .times(1)
            .returning(|_, _| Ok(()));
        active.install(Arc::new(transport)).await;

        assert!(active.send_message("alice@s", "hello").await.is_ok());
    }

    #[tokio::test]
    async fn test_clear_removes_transport() {
        let active = ActiveSession::new(Arc::new(MetadataCache::new()));
        active.install(Arc::new(MockTransport::new())).await;

        assert!(active.clear().await.is_some());
        assert!(active.current().await.is_none());
        assert!(active.clear().await.is_none());
    }

    #[tokio::test]
    async fn test_group_metadata_served_from_cache() {
        let cache = Arc::new(MetadataCache::new());
        cache.upsert_group(create_group("team@g", "Team"), 1);
        let active = ActiveSession::new(cache);
        let mut transport = MockTransport::new();
        transport.expect_fetch_group().never();
        active.install(Arc::new(transport)).await;

        let group = active.group_metadata("team@g").await.unwrap();

        assert_eq!(group.subject, "Team");
    }

    #[tokio::test]
    async fn test_group_metadata_fetched_and_cached() {
        let cache = Arc::new(MetadataCache::new());
        let active = ActiveSession::new(Arc::clone(&cache));
        let mut transport = MockTransport::new();
        transport
            .expect_fetch_group()
            .with(eq("team@g"))
            .times(1)
            .returning(|id| Ok(create_group(id, "Team")));
        active.install(Arc::new(transport)).await;

        let first = active.group_metadata("team@g").await.unwrap();
        let second = active.group_metadata("team@g").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.group("team@g").unwrap().subject, "Team");
    }

    #[tokio::test]
    async fn test_group_metadata_without_session() {
        let active = ActiveSession::new(Arc::new(MetadataCache::new()));

        let result = active.group_metadata("team@g").await;

        assert!(matches!(result, Err(TransportError::NotConnected)));
    }
}
