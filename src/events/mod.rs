//! Inbound event processing.
//!
//! - [`router`] - consumes the ordered event stream of a session
//! - [`dispatcher`] - fans live messages out to the command engine and the recorder
//! - [`message`] - normalization of raw messages

mod dispatcher;
mod message;
mod router;

pub use crate::events::{
    dispatcher::{
        CommandEngine, DispatchSettings, MessageDispatcher, MessageRecorder,
        spawn_failure_reporter,
    },
    message::{ChatKind, NormalizedMessage},
    router::EventRouter,
};

#[cfg(test)]
pub use crate::events::dispatcher::{MockCommandEngine, MockMessageRecorder};
