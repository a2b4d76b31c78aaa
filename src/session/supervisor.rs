//! The reconnect loop.
//!
//! The [`Supervisor`] builds one [`ConnectionSession`] at a time, routes its events
//! until it closes, then asks the [`ReconnectController`] whether to start a new one.
//! A session that cannot be built, or whose credentials cannot be saved, counts as
//! a transient failure of that attempt.

use std::{future::Future, sync::Arc, time::Duration};

use log::{error, info, warn};
use tokio::{sync::Notify, time};

use crate::{
    events::EventRouter,
    session::{ActiveSession, ConnectionSession, Decision, ReconnectController, SessionSettings},
    store::CredentialStore,
    transport::{Connector, DisconnectReason},
};

/// Why the supervisor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// The account credentials were revoked
    LoggedOut,
    /// Shutdown was requested
    Shutdown,
}

impl SessionExit {
    pub fn exit_code(&self) -> u8 {
        match self {
            SessionExit::Shutdown => 0,
            SessionExit::LoggedOut => 1,
        }
    }
}

/// End of one session attempt.
struct Attempt {
    /// `None` when the attempt failed before or outside of a close
    reason: Option<DisconnectReason>,
    open_for: Option<Duration>,
}

pub struct Supervisor<C: Connector> {
    connector: C,
    store: Arc<CredentialStore>,
    active: ActiveSession,
    router: EventRouter,
    controller: ReconnectController,
    settings: SessionSettings,
    refresh: Option<Arc<Notify>>,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(
        connector: C,
        store: Arc<CredentialStore>,
        active: ActiveSession,
        router: EventRouter,
        controller: ReconnectController,
        settings: SessionSettings,
    ) -> Self {
        Supervisor {
            connector,
            store,
            active,
            router,
            controller,
            settings,
            refresh: None,
        }
    }

    /// Requests a metadata refresh through `trigger` each time a session opens.
    pub fn with_refresh_trigger(mut self, trigger: Arc<Notify>) -> Self {
        self.refresh = Some(trigger);
        self
    }

    /// Runs sessions until the account is logged out or `shutdown` completes.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> SessionExit {
        tokio::pin!(shutdown);
        let mut sessions: u64 = 0;

        loop {
            sessions += 1;
            info!("start session #{}", sessions);

            let attempt = tokio::select! {
                _ = &mut shutdown => None,
                attempt = self.run_session() => Some(attempt),
            };
            let Some(attempt) = attempt else {
                self.stop().await;
                return SessionExit::Shutdown;
            };

            let delay = match self.controller.decide(attempt.reason, attempt.open_for) {
                Decision::Terminate => {
                    self.stop().await;
                    return SessionExit::LoggedOut;
                }
                Decision::Reconnect(delay) => delay,
            };

            if !delay.is_zero() {
                info!("reconnect in {:?}", delay);
            }
            let interrupted = tokio::select! {
                _ = &mut shutdown => true,
                _ = time::sleep(delay) => false,
            };
            if interrupted {
                self.stop().await;
                return SessionExit::Shutdown;
            }
        }
    }

    async fn run_session(&self) -> Attempt {
        let opened =
            ConnectionSession::open(&self.connector, &self.store, &self.active, &self.settings)
                .await;
        let (mut session, mut events) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                error!("failed to start session: {}", e);
                return Attempt {
                    reason: None,
                    open_for: None,
                };
            }
        };

        while let Some(unit) = events.recv().await {
            let outcome = self.router.route(&mut session, unit).await;

            if outcome.opened
                && let Some(refresh) = &self.refresh
            {
                refresh.notify_one();
            }

            if let Some(failure) = outcome.failure {
                error!("abort session: {}", failure);
                session.close_with(DisconnectReason::ConnectionClosed).await;
                return Attempt {
                    reason: None,
                    open_for: session.open_for(),
                };
            }

            if let Some(reason) = outcome.closed {
                return Attempt {
                    reason: Some(reason),
                    open_for: session.open_for(),
                };
            }
        }

        warn!("event stream ended in state {:?}", session.state());
        let reason = session.close_with(DisconnectReason::ConnectionLost).await;
        Attempt {
            reason: Some(reason),
            open_for: session.open_for(),
        }
    }

    async fn stop(&self) {
        if let Some(transport) = self.active.clear().await {
            transport.close().await;
        }
    }
}
