//! Command action handlers.
//!
//! Each handler receives a [`CommandContext`](crate::commands::CommandContext)
//! and returns a [`CommandResult`](crate::commands::CommandResult). Handlers never
//! talk to the session: the commander sends the reply.

mod groups;
mod help;
mod ping;
mod whoami;

pub use crate::commands::actions::{
    groups::handle_groups, help::handle_help, ping::handle_ping, whoami::handle_whoami,
};
