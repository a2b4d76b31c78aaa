//! Ronron - a long-lived session manager for chat bots.
//!
//! Ronron keeps one authenticated connection to a messaging service alive for as
//! long as the process runs. It persists the session credentials across restarts,
//! reconnects on every transient disconnect and hands each live message to a command
//! engine and to a message log without ever blocking the event stream.
//!
//! # Overview
//!
//! The messaging protocol itself lives in a child process, the bridge, which talks
//! to ronron with newline-delimited JSON on its standard streams. Ronron owns
//! everything around it:
//!
//! - **Credentials**: stored in SQLite (WAL mode), rotated credentials are saved in
//!   a single transaction so a crash never leaves a half written value
//! - **Reconnection**: every disconnect except a logout starts a brand new session,
//!   after a capped exponential backoff
//! - **Dispatch**: live messages are normalized and handed to the command engine and
//!   the message log in bounded, timed tasks
//! - **Metadata**: the group roster is refreshed on a timer and on every new session
//!
//! # Configuration
//!
//! ```yaml
//! database: "ronron.db"
//! bridge:
//!   command: "node"
//!   args: ["bridge/index.js"]
//! session:
//!   notify_recipient: "33600000000@s.whatsapp.net"
//! ```
//!
//! Every value can be overridden with a `RONRON_` environment variable, see [`config`].
//!
//! # Usage
//!
//! ```bash
//! ronron --config config.yaml --database /var/lib/ronron/ronron.db
//! ```
//!
//! # Bot Commands
//!
//! - `!ronron help` - Display help information
//! - `!ronron ping` - Check that the bot is alive
//! - `!ronron groups` - List the known groups
//! - `!ronron whoami` - Show the sender and chat as seen by the bot
//!
//! # Architecture
//!
//! - [`transport`] - transport contract and the bridge process implementation
//! - [`store`] - SQLite persistence of credentials, keys, messages and groups
//! - [`metadata`] - group and contact cache with its refresh loop
//! - [`session`] - session state machine, reconnect policy and supervisor
//! - [`events`] - event routing and message dispatch
//! - [`commands`] - built-in command engine
//! - [`config`] - YAML configuration with environment overrides
//! - [`utils`] - small shared helpers
//!
//! # Exit Codes
//!
//! - `0` - stopped with Ctrl-C
//! - `1` - the account was logged out, credentials must be linked again
//! - `2` - startup failure (configuration or database)
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - Controls logging level (default: `info`)

use std::{process::ExitCode, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use tokio::time;

use crate::{
    commands::Commander,
    config::Config,
    events::{EventRouter, MessageDispatcher, spawn_failure_reporter},
    metadata::{MetadataCache, MetadataRefresher},
    session::{ActiveSession, ReconnectController, SessionExit, Supervisor},
    store::{CredentialStore, Database, GroupStore, MessageLog},
    transport::bridge::BridgeConnector,
};

mod commands;
mod config;
mod events;
mod metadata;
mod session;
mod store;
mod transport;
mod utils;

/// Exit code of a startup failure.
const STARTUP_FAILURE: u8 = 2;

/// Command-line arguments.
///
/// # Examples
///
/// ```bash
/// ronron --config config.yaml
/// ronron --config config.yaml --database ./data/ronron.db
/// ```
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file.
    ///
    /// See the [`config`] module for the expected format.
    #[arg(short, long)]
    config: String,

    /// Path to the SQLite database, overrides the `database` configuration key.
    ///
    /// The database holds the session credentials and key material: anyone able to
    /// read it can impersonate the account.
    #[arg(short, long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Put logger at info level by default
    let env = Env::default().filter_or("RUST_LOG", "info");
    env_logger::init_from_env(env);

    info!("starting ronron {}...", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load config file: {}", e);
            return ExitCode::from(STARTUP_FAILURE);
        }
    };
    if let Some(database) = args.database {
        config.database = database;
    }

    match run(config).await {
        Ok(exit) => {
            match exit {
                SessionExit::Shutdown => info!("stopped"),
                SessionExit::LoggedOut => {
                    error!("account logged out, link it again to restart the bot")
                }
            }
            ExitCode::from(exit.exit_code())
        }
        Err(e) => {
            error!("failed to start: {:#}", e);
            ExitCode::from(STARTUP_FAILURE)
        }
    }
}

/// Wires every component and runs sessions until logout or Ctrl-C.
async fn run(config: Config) -> anyhow::Result<SessionExit> {
    let database = Database::open(&config.database)
        .await
        .with_context(|| format!("failed to open database {}", config.database))?;
    info!("database opened at {}", database.path().display());

    let cache = Arc::new(MetadataCache::new());
    let group_store = match config.metadata.persist {
        true => Some(GroupStore::new(database.clone())),
        false => None,
    };
    if let Some(store) = &group_store {
        let groups = store.load().await;
        info!("restored {} groups", groups.len());
        for (group, observed_at) in groups {
            cache.upsert_group(group, observed_at);
        }
    }

    let active = ActiveSession::new(Arc::clone(&cache));

    let refresher = MetadataRefresher::new(active.clone(), config.refresh_interval(), group_store);
    let refresh_trigger = refresher.trigger();
    let refresh_task = refresher.start();

    let commander = Arc::new(Commander::new(&config.commands.prefix, active.clone()));
    let message_log = Arc::new(MessageLog::new(database.clone()));
    let (dispatcher, failures) = MessageDispatcher::new(
        commander,
        message_log,
        Arc::clone(&cache),
        config.dispatch_settings(),
    );
    let reporter = spawn_failure_reporter(failures);

    let mut supervisor = Supervisor::new(
        BridgeConnector::new(config.bridge_settings()),
        Arc::new(CredentialStore::new(database)),
        active,
        EventRouter::new(dispatcher, cache),
        ReconnectController::new(config.backoff_policy()),
        config.session_settings(),
    )
    .with_refresh_trigger(refresh_trigger);

    let exit = supervisor.run(shutdown_signal()).await;

    refresh_task.abort();
    drop(supervisor);
    // Let running message tasks report before leaving
    if time::timeout(Duration::from_secs(5), reporter).await.is_err() {
        warn!("message tasks still running at exit");
    }

    Ok(exit)
}

/// Completes on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {}", e);
        futures::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
