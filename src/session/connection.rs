//! One transport connection and its lifecycle.
//!
//! A [`ConnectionSession`] starts in [`ConnectionState::Connecting`], becomes
//! [`ConnectionState::Open`] when the transport reports it and ends in
//! [`ConnectionState::Closed`]. A closed session is never reused: the supervisor
//! builds a brand new one, with a new handshake, for the next attempt.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::{
    session::{ActiveSession, SessionError, SessionSettings},
    store::{CredentialStore, Credentials, CredentialsUpdate, KeyStore},
    transport::{
        Connection, ConnectionPhase, ConnectionUpdate, Connector, DisconnectReason, EventUnit,
        GroupLookup, Transport, TransportSetup,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed(DisconnectReason),
}

impl ConnectionState {
    /// Returns `true` when the state machine allows moving to `next`.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Connecting, ConnectionState::Open)
                | (ConnectionState::Connecting, ConnectionState::Closed(_))
                | (ConnectionState::Open, ConnectionState::Closed(_))
        )
    }
}

pub struct ConnectionSession {
    transport: Arc<dyn Transport>,
    state: ConnectionState,
    credentials: Credentials,
    store: Arc<CredentialStore>,
    active: ActiveSession,
    settings: SessionSettings,
    opened_at: Option<Instant>,
    closed_at: Option<Instant>,
}

impl ConnectionSession {
    /// Loads the persisted credentials and starts a new transport connection.
    ///
    /// # Arguments
    ///
    /// * `connector` - builder of the transport connection
    /// * `store` - credentials and key material
    /// * `active` - handle the transport is installed into once open
    /// * `settings` - online message settings
    ///
    /// # Returns
    ///
    /// The session in [`ConnectionState::Connecting`] and its event stream.
    pub async fn open(
        connector: &dyn Connector,
        store: &Arc<CredentialStore>,
        active: &ActiveSession,
        settings: &SessionSettings,
    ) -> Result<(Self, mpsc::Receiver<EventUnit>), SessionError> {
        let credentials = store.load().await?;
        match &credentials {
            Some(credentials) => debug!(
                "resume session of {}",
                credentials.identity.as_deref().unwrap_or("unlinked account")
            ),
            None => info!("no stored credentials, start a new pairing"),
        }

        let keys: Arc<dyn KeyStore> = store.clone();
        let groups: Arc<dyn GroupLookup> = active.cache();
        let Connection { transport, events } = connector
            .connect(TransportSetup {
                credentials: credentials.clone(),
                keys,
                groups,
            })
            .await?;

        let session = ConnectionSession {
            transport,
            state: ConnectionState::Connecting,
            credentials: credentials.unwrap_or_default(),
            store: Arc::clone(store),
            active: active.clone(),
            settings: settings.clone(),
            opened_at: None,
            closed_at: None,
        };
        Ok((session, events))
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Identity of the account, once linked.
    pub fn identity(&self) -> Option<&str> {
        self.credentials.identity.as_deref()
    }

    /// How long the session stayed open, `None` if it never opened.
    pub fn open_for(&self) -> Option<Duration> {
        let opened_at = self.opened_at?;
        Some(match self.closed_at {
            Some(closed_at) => closed_at.duration_since(opened_at),
            None => opened_at.elapsed(),
        })
    }

    /// Applies a connection update reported by the transport.
    ///
    /// # Returns
    ///
    /// The new state when the update moved the state machine.
    pub async fn handle_connection_update(
        &mut self,
        update: &ConnectionUpdate,
    ) -> Option<ConnectionState> {
        if let Some(qr) = &update.qr {
            info!("scan this pairing code to link the account: {}", qr);
        }

        let next = match update.connection? {
            ConnectionPhase::Connecting => ConnectionState::Connecting,
            ConnectionPhase::Open => ConnectionState::Open,
            ConnectionPhase::Close => ConnectionState::Closed(update.disconnect_reason()),
        };
        self.transition(next).await
    }

    /// Closes the session with `reason` unless it is already closed.
    ///
    /// # Returns
    ///
    /// The reason the session is closed with.
    pub async fn close_with(&mut self, reason: DisconnectReason) -> DisconnectReason {
        if let ConnectionState::Closed(current) = self.state {
            return current;
        }
        self.transition(ConnectionState::Closed(reason)).await;
        reason
    }

    /// Merges rotated credentials and persists the merged value.
    pub async fn apply_credentials(&mut self, update: &CredentialsUpdate) -> Result<(), SessionError> {
        self.credentials.apply(update);
        self.store.save(&self.credentials).await?;
        debug!("credentials rotated and saved");
        Ok(())
    }

    async fn transition(&mut self, next: ConnectionState) -> Option<ConnectionState> {
        if self.state == next && !matches!(next, ConnectionState::Open) {
            return None;
        }
        if !self.state.can_transition_to(&next) {
            warn!("ignore transition from {:?} to {:?}", self.state, next);
            return None;
        }

        debug!("session {:?} -> {:?}", self.state, next);
        self.state = next;
        match next {
            ConnectionState::Open => self.on_open().await,
            ConnectionState::Closed(reason) => self.on_closed(reason).await,
            ConnectionState::Connecting => {}
        }
        Some(next)
    }

    async fn on_open(&mut self) {
        self.opened_at = Some(Instant::now());
        self.active.install(Arc::clone(&self.transport)).await;
        info!(
            "session open as {}",
            self.identity().unwrap_or("unknown account")
        );

        let recipient = self
            .settings
            .notify_recipient
            .clone()
            .or_else(|| self.credentials.identity.clone());
        let Some(recipient) = recipient else {
            debug!("no recipient for the online message");
            return;
        };

        // Sent aside so the event stream keeps flowing while the reply is pending
        let transport = Arc::clone(&self.transport);
        let text = self.settings.online_message.clone();
        tokio::spawn(async move {
            match transport.send_message(&recipient, &text).await {
                Ok(()) => debug!("online message sent to {}", recipient),
                Err(e) => warn!("failed to send online message to {}: {}", recipient, e),
            }
        });
    }

    async fn on_closed(&mut self, reason: DisconnectReason) {
        self.closed_at = Some(Instant::now());
        self.active.clear().await;
        self.transport.close().await;
        info!("session closed: {}", reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::MetadataCache,
        store::Database,
        transport::{GroupMetadata, MockTransport, TransportError},
    };
    use async_trait::async_trait;
    use mockall::predicate::eq;
    use std::{collections::HashMap, sync::Mutex};
    use tempfile::TempDir;

    /// Connector handing out one prepared transport and keeping the setup it got.
    struct OneShotConnector {
        transport: Mutex<Option<Arc<dyn Transport>>>,
        setup: Mutex<Option<TransportSetup>>,
        events: Mutex<Option<mpsc::Receiver<EventUnit>>>,
    }

    impl OneShotConnector {
        fn new(transport: impl Transport + 'static) -> (Self, mpsc::Sender<EventUnit>) {
            let (tx, rx) = mpsc::channel(8);
            let connector = OneShotConnector {
                transport: Mutex::new(Some(Arc::new(transport))),
                setup: Mutex::new(None),
                events: Mutex::new(Some(rx)),
            };
            (connector, tx)
        }
    }

    #[async_trait]
    impl Connector for OneShotConnector {
        async fn connect(&self, setup: TransportSetup) -> Result<Connection, TransportError> {
            *self.setup.lock().unwrap() = Some(setup);
            let transport = self.transport.lock().unwrap().take().ok_or(TransportError::Closed)?;
            let events = self.events.lock().unwrap().take().ok_or(TransportError::Closed)?;
            Ok(Connection { transport, events })
        }
    }

    async fn create_store(dir: &TempDir) -> Arc<CredentialStore> {
        let database = Database::open(dir.path().join("ronron.db")).await.unwrap();
        Arc::new(CredentialStore::new(database))
    }

    fn settings(recipient: Option<&str>) -> SessionSettings {
        SessionSettings {
            notify_recipient: recipient.map(str::to_string),
            online_message: "online".to_string(),
        }
    }

    fn update(phase: ConnectionPhase, status_code: Option<u16>) -> ConnectionUpdate {
        ConnectionUpdate {
            connection: Some(phase),
            status_code,
            qr: None,
        }
    }

    #[test]
    fn test_transitions() {
        let closed = ConnectionState::Closed(DisconnectReason::ConnectionLost);

        assert!(ConnectionState::Connecting.can_transition_to(&ConnectionState::Open));
        assert!(ConnectionState::Connecting.can_transition_to(&closed));
        assert!(ConnectionState::Open.can_transition_to(&closed));
        assert!(!ConnectionState::Open.can_transition_to(&ConnectionState::Connecting));
        assert!(!ConnectionState::Open.can_transition_to(&ConnectionState::Open));
        assert!(!closed.can_transition_to(&ConnectionState::Open));
        assert!(!closed.can_transition_to(&ConnectionState::Connecting));
    }

    #[tokio::test]
    async fn test_open_hands_stored_credentials_to_transport() {
        let dir = TempDir::new().unwrap();
        let store = create_store(&dir).await;
        let stored = Credentials {
            identity: Some("bot@s".to_string()),
            ..Default::default()
        };
        store.save(&stored).await.unwrap();
        let (connector, _events) = OneShotConnector::new(MockTransport::new());
        let active = ActiveSession::new(Arc::new(MetadataCache::new()));

        let (session, _rx) = ConnectionSession::open(&connector, &store, &active, &settings(None))
            .await
            .unwrap();

        assert_eq!(session.state(), ConnectionState::Connecting);
        assert_eq!(session.identity(), Some("bot@s"));
        let setup = connector.setup.lock().unwrap().take().unwrap();
        assert_eq!(setup.credentials, Some(stored));
    }

    /// Transport whose sends never get an answer.
    struct SilentTransport;

    #[async_trait]
    impl Transport for SilentTransport {
        async fn send_message(&self, _recipient: &str, _text: &str) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn fetch_all_groups(
            &self,
        ) -> Result<HashMap<String, GroupMetadata>, TransportError> {
            Ok(HashMap::new())
        }

        async fn fetch_group(&self, _group_id: &str) -> Result<GroupMetadata, TransportError> {
            Err(TransportError::Closed)
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_open_sends_online_message_once() {
        let dir = TempDir::new().unwrap();
        let store = create_store(&dir).await;
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let mut transport = MockTransport::new();
        transport
            .expect_send_message()
            .with(eq("ops@s"), eq("online"))
            .times(1)
            .returning(move |_, _| {
                let _ = sent_tx.send(());
                Ok(())
            });
        let (connector, _events) = OneShotConnector::new(transport);
        let active = ActiveSession::new(Arc::new(MetadataCache::new()));
        let (mut session, _rx) =
            ConnectionSession::open(&connector, &store, &active, &settings(Some("ops@s")))
                .await
                .unwrap();

        let first = session
            .handle_connection_update(&update(ConnectionPhase::Open, None))
            .await;
        let second = session
            .handle_connection_update(&update(ConnectionPhase::Open, None))
            .await;

        assert_eq!(first, Some(ConnectionState::Open));
        assert_eq!(second, None);
        assert!(active.current().await.is_some());
        assert!(session.open_for().is_some());
        assert!(sent_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_open_does_not_wait_for_online_message() {
        let dir = TempDir::new().unwrap();
        let store = create_store(&dir).await;
        let (connector, _events) = OneShotConnector::new(SilentTransport);
        let active = ActiveSession::new(Arc::new(MetadataCache::new()));
        let (mut session, _rx) =
            ConnectionSession::open(&connector, &store, &active, &settings(Some("ops@s")))
                .await
                .unwrap();

        let state = tokio::time::timeout(
            Duration::from_secs(1),
            session.handle_connection_update(&update(ConnectionPhase::Open, None)),
        )
        .await;

        assert_eq!(state.ok(), Some(Some(ConnectionState::Open)));
    }

    #[tokio::test]
    async fn test_online_message_falls_back_to_identity() {
        let dir = TempDir::new().unwrap();
        let store = create_store(&dir).await;
        store
            .save(&Credentials {
                identity: Some("bot@s".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let mut transport = MockTransport::new();
        transport
            .expect_send_message()
            .with(eq("bot@s"), eq("online"))
            .times(1)
            .returning(move |_, _| {
                let _ = sent_tx.send(());
                Ok(())
            });
        let (connector, _events) = OneShotConnector::new(transport);
        let active = ActiveSession::new(Arc::new(MetadataCache::new()));
        let (mut session, _rx) = ConnectionSession::open(&connector, &store, &active, &settings(None))
            .await
            .unwrap();

        session
            .handle_connection_update(&update(ConnectionPhase::Open, None))
            .await;

        assert!(sent_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_online_message_skipped_without_recipient() {
        let dir = TempDir::new().unwrap();
        let store = create_store(&dir).await;
        let mut transport = MockTransport::new();
        transport.expect_send_message().never();
        let (connector, _events) = OneShotConnector::new(transport);
        let active = ActiveSession::new(Arc::new(MetadataCache::new()));
        let (mut session, _rx) = ConnectionSession::open(&connector, &store, &active, &settings(None))
            .await
            .unwrap();

        let state = session
            .handle_connection_update(&update(ConnectionPhase::Open, None))
            .await;

        assert_eq!(state, Some(ConnectionState::Open));
    }

    #[tokio::test]
    async fn test_close_clears_active_and_closes_transport() {
        let dir = TempDir::new().unwrap();
        let store = create_store(&dir).await;
        let mut transport = MockTransport::new();
        transport.expect_send_message().returning(|_, _| Ok(()));
        transport.expect_close().times(1).returning(|| ());
        let (connector, _events) = OneShotConnector::new(transport);
        let active = ActiveSession::new(Arc::new(MetadataCache::new()));
        let (mut session, _rx) =
            ConnectionSession::open(&connector, &store, &active, &settings(Some("ops@s")))
                .await
                .unwrap();
        session
            .handle_connection_update(&update(ConnectionPhase::Open, None))
            .await;

        let state = session
            .handle_connection_update(&update(ConnectionPhase::Close, Some(401)))
            .await;

        assert_eq!(
            state,
            Some(ConnectionState::Closed(DisconnectReason::LoggedOut))
        );
        assert!(active.current().await.is_none());

        // A later close keeps the first reason
        assert_eq!(
            session.close_with(DisconnectReason::ConnectionLost).await,
            DisconnectReason::LoggedOut
        );
    }

    #[tokio::test]
    async fn test_closed_session_cannot_reopen() {
        let dir = TempDir::new().unwrap();
        let store = create_store(&dir).await;
        let mut transport = MockTransport::new();
        transport.expect_close().times(1).returning(|| ());
        transport.expect_send_message().never();
        let (connector, _events) = OneShotConnector::new(transport);
        let active = ActiveSession::new(Arc::new(MetadataCache::new()));
        let (mut session, _rx) = ConnectionSession::open(&connector, &store, &active, &settings(None))
            .await
            .unwrap();

        session.close_with(DisconnectReason::ConnectionLost).await;
        let state = session
            .handle_connection_update(&update(ConnectionPhase::Open, None))
            .await;

        assert_eq!(state, None);
        assert!(active.current().await.is_none());
        assert_eq!(session.open_for(), None);
    }

    #[tokio::test]
    async fn test_apply_credentials_persists_merged_value() {
        let dir = TempDir::new().unwrap();
        let store = create_store(&dir).await;
        let (connector, _events) = OneShotConnector::new(MockTransport::new());
        let active = ActiveSession::new(Arc::new(MetadataCache::new()));
        let (mut session, _rx) = ConnectionSession::open(&connector, &store, &active, &settings(None))
            .await
            .unwrap();
        let mut first = CredentialsUpdate::default();
        first
            .material
            .insert("noise".to_string(), serde_json::json!("k1"));
        let second = CredentialsUpdate {
            identity: Some("bot@s".to_string()),
            ..Default::default()
        };

        session.apply_credentials(&first).await.unwrap();
        session.apply_credentials(&second).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.identity.as_deref(), Some("bot@s"));
        assert_eq!(loaded.material.get("noise"), Some(&serde_json::json!("k1")));
        assert_eq!(session.identity(), Some("bot@s"));
    }
}
