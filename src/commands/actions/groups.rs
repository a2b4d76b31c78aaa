//! Groups command handler.
//!
//! Lists the groups held by the metadata cache, with their participant count.
//! The cache is filled by the refresh loop and by group events, so a group the
//! account just joined may take one refresh to show up.

use log::debug;

use crate::commands::{CommandContext, CommandResult, responses::format_groups};

/// Lists the cached groups of the context.
pub fn handle_groups(context: &CommandContext) -> CommandResult {
    debug!("handling groups command");

    let result = CommandResult {
        response: format_groups(&context.groups),
    };

    debug!("groups command result {:?}", result);

    result
}
