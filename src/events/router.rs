use std::sync::Arc;

use log::{debug, error, trace};

use crate::{
    events::dispatcher::MessageDispatcher,
    metadata::MetadataCache,
    session::{ConnectionSession, ConnectionState, SessionError},
    transport::{DisconnectReason, EventUnit},
    utils::now_millis,
};

/// What handling one event unit did to the session.
#[derive(Debug, Default)]
pub struct RouteOutcome {
    /// The session moved to open
    pub opened: bool,
    /// The session closed with this reason
    pub closed: Option<DisconnectReason>,
    /// A handler failed and the session attempt cannot go on
    pub failure: Option<SessionError>,
}

/// Single consumer of a session event stream.
///
/// Every kind carried by a unit is handled, in this order: connection update,
/// credentials, contacts, groups, messages.
pub struct EventRouter {
    dispatcher: MessageDispatcher,
    cache: Arc<MetadataCache>,
}

impl EventRouter {
    pub fn new(dispatcher: MessageDispatcher, cache: Arc<MetadataCache>) -> Self {
        EventRouter { dispatcher, cache }
    }

    /// Handles one event unit.
    ///
    /// A close carried by the unit is only reported in the outcome, after the
    /// rest of the unit has been handled.
    pub async fn route(&self, session: &mut ConnectionSession, unit: EventUnit) -> RouteOutcome {
        let mut outcome = RouteOutcome::default();
        if unit.is_empty() {
            trace!("skip unit without known event");
            return outcome;
        }

        if let Some(update) = unit.connection_update {
            match session.handle_connection_update(&update).await {
                Some(ConnectionState::Open) => outcome.opened = true,
                Some(ConnectionState::Closed(reason)) => outcome.closed = Some(reason),
                Some(ConnectionState::Connecting) | None => {}
            }
        }

        if let Some(update) = unit.credentials_update
            && let Err(e) = session.apply_credentials(&update).await
        {
            error!("failed to save rotated credentials: {}", e);
            outcome.failure = Some(e);
        }

        let observed_at = now_millis();
        let contacts = unit
            .contacts_upsert
            .into_iter()
            .chain(unit.contacts_update)
            .flatten();
        for contact in contacts {
            self.cache.upsert_contact(contact, observed_at);
        }

        for group in unit.groups_upsert.into_iter().flatten() {
            self.cache.upsert_group(group, observed_at);
        }
        for update in unit.groups_update.into_iter().flatten() {
            self.cache.merge_group(update, observed_at);
        }

        if let Some(batch) = unit.messages_upsert {
            let count = self.dispatcher.dispatch_batch(batch, session.identity()).await;
            debug!("dispatched {} messages", count);
        }

        outcome
    }
}
