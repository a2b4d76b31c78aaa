use log::debug;

use crate::commands::{CommandResult, responses::format_pong};

pub fn handle_ping() -> CommandResult {
    debug!("handling ping command");

    CommandResult {
        response: format_pong(),
    }
}
