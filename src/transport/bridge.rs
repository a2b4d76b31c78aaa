//! Transport backed by a bridge child process.
//!
//! The bridge implements the messaging protocol and talks to this process with
//! newline-delimited JSON over its stdio (see [`protocol`](super::protocol)).
//! One bridge process is spawned per session attempt and killed when the session
//! is discarded.
//!
//! ```text
//!                 commands (stdin)
//!  BridgeTransport ───────────────▶ ┌────────┐
//!                                   │ bridge │
//!  event stream   ◀─────────────── └────────┘
//!                 events (stdout)
//! ```
//!
//! The bridge may call back into this process to read or write key material and
//! to look up group metadata. Those callbacks are served inline by the I/O task so
//! that a key write is always visible to the key reads that follow it. A key store
//! failure ends the connection with [`DisconnectReason::ConnectionClosed`].
//!
//! Event units are queued to a forwarder task, so responses and callbacks keep
//! being read while the event stream is not drained.

use std::{
    collections::HashMap,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines},
    process::{Child, Command},
    sync::{Mutex, mpsc, oneshot},
    time,
};

use crate::{
    store::KeyStore,
    transport::{
        Connection, Connector, DisconnectReason, EventUnit, GroupLookup, GroupMetadata, Transport,
        TransportError, TransportSetup,
        protocol::{BridgeCommand, BridgeEvent},
    },
};

/// Capacity of the event channel handed to the session.
const EVENT_CHANNEL_SIZE: usize = 256;
/// Capacity of the outbound command channel.
const COMMAND_CHANNEL_SIZE: usize = 64;
/// Time given to the bridge to exit after a shutdown before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, TransportError>>>>>;

/// How to launch the bridge process.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// Maximum wait for the answer to one request
    pub request_timeout: Duration,
}

/// Spawns one bridge process per connection.
pub struct BridgeConnector {
    settings: BridgeSettings,
}

impl BridgeConnector {
    pub fn new(settings: BridgeSettings) -> Self {
        BridgeConnector { settings }
    }

    fn spawn_child(&self) -> std::io::Result<Child> {
        let mut command = Command::new(&self.settings.command);
        command
            .args(&self.settings.args)
            .envs(&self.settings.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command.spawn()
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    async fn connect(&self, setup: TransportSetup) -> Result<Connection, TransportError> {
        info!("spawn bridge {}", self.settings.command);
        let mut child = self.spawn_child().map_err(TransportError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Protocol("bridge stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Protocol("bridge stdout is not piped".to_string()))?;
        debug!("bridge started with pid {:?}", child.id());

        Ok(BridgeTransport::start(
            BufReader::new(stdout),
            stdin,
            Some(child),
            setup,
            self.settings.request_timeout,
        ))
    }
}

/// Outbound half of a bridge connection.
///
/// Requests are tagged with an increasing id and matched with the bridge
/// `response` carrying the same id. A request without answer fails after the
/// configured timeout.
pub struct BridgeTransport {
    commands: mpsc::Sender<BridgeCommand>,
    pending: Pending,
    next_request_id: AtomicU64,
    request_timeout: Duration,
}

impl BridgeTransport {
    /// Starts the I/O task over an already connected bridge.
    ///
    /// The `start` command carrying `setup.credentials` is the first line written.
    ///
    /// # Arguments
    ///
    /// * `reader` - bridge output
    /// * `writer` - bridge input
    /// * `child` - bridge process, reaped when the connection ends
    /// * `setup` - credentials and callbacks for this connection
    /// * `request_timeout` - maximum wait for one response
    pub fn start<R, W>(
        reader: R,
        writer: W,
        child: Option<Child>,
        setup: TransportSetup,
        request_timeout: Duration,
    ) -> Connection
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (unit_tx, unit_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let io = BridgeIo {
            writer,
            commands: command_rx,
            units: unit_tx,
            pending: Arc::clone(&pending),
            keys: setup.keys,
            groups: setup.groups,
            close_reason: DisconnectReason::ConnectionLost,
        };
        let start = BridgeCommand::Start {
            credentials: setup.credentials,
        };
        tokio::spawn(forward_units(unit_rx, event_tx));
        tokio::spawn(io.run(reader, start, child));

        let transport = BridgeTransport {
            commands: command_tx,
            pending,
            next_request_id: AtomicU64::new(1),
            request_timeout,
        };

        Connection {
            transport: Arc::new(transport),
            events: event_rx,
        }
    }

    fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request(
        &self,
        request_id: u64,
        command: BridgeCommand,
    ) -> Result<Value, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, tx);

        if self.commands.send(command).await.is_err() {
            self.pending.lock().await.remove(&request_id);
            return Err(TransportError::Closed);
        }

        match time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(TransportError::Timeout(request_id))
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, TransportError> {
    serde_json::from_value(value).map_err(|e| TransportError::Protocol(e.to_string()))
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn send_message(&self, recipient: &str, text: &str) -> Result<(), TransportError> {
        let request_id = self.next_request_id();
        let command = BridgeCommand::SendMessage {
            request_id,
            recipient: recipient.to_string(),
            text: text.to_string(),
        };
        self.request(request_id, command).await?;
        debug!("message sent to {}", recipient);
        Ok(())
    }

    async fn fetch_all_groups(&self) -> Result<HashMap<String, GroupMetadata>, TransportError> {
        let request_id = self.next_request_id();
        let value = self
            .request(request_id, BridgeCommand::FetchAllGroups { request_id })
            .await?;
        decode(value)
    }

    async fn fetch_group(&self, group_id: &str) -> Result<GroupMetadata, TransportError> {
        let request_id = self.next_request_id();
        let command = BridgeCommand::FetchGroup {
            request_id,
            group_id: group_id.to_string(),
        };
        let value = self.request(request_id, command).await?;
        decode(value)
    }

    async fn close(&self) {
        if self.commands.send(BridgeCommand::Shutdown).await.is_err() {
            debug!("bridge already stopped");
        }
    }
}

/// Moves queued units to the session event stream, in order.
async fn forward_units(
    mut units: mpsc::UnboundedReceiver<EventUnit>,
    events: mpsc::Sender<EventUnit>,
) {
    while let Some(unit) = units.recv().await {
        if events.send(unit).await.is_err() {
            debug!("event stream dropped");
            return;
        }
    }
}

/// I/O side of a bridge connection, owned by its task.
struct BridgeIo<W> {
    writer: W,
    commands: mpsc::Receiver<BridgeCommand>,
    units: mpsc::UnboundedSender<EventUnit>,
    pending: Pending,
    keys: Arc<dyn KeyStore>,
    groups: Arc<dyn GroupLookup>,
    /// Reason reported when the connection ends
    close_reason: DisconnectReason,
}

impl<W: AsyncWrite + Unpin + Send> BridgeIo<W> {
    async fn run<R>(mut self, reader: R, start: BridgeCommand, mut child: Option<Child>)
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let mut lines = reader.lines();

        match self.write(&start).await {
            Ok(()) => self.pump(&mut lines).await,
            Err(e) => error!("failed to start the bridge session: {}", e),
        }

        for (_, tx) in self.pending.lock().await.drain() {
            let _ = tx.send(Err(TransportError::Closed));
        }

        // Ignored by the session when the bridge already reported its close
        let _ = self.units.send(EventUnit::closed(self.close_reason));

        if let Some(child) = child.as_mut() {
            reap(child).await;
        }
    }

    async fn pump<R>(&mut self, lines: &mut Lines<R>)
    where
        R: AsyncBufRead + Unpin + Send,
    {
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if !self.handle_line(&line).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("bridge closed its output");
                        break;
                    }
                    Err(e) => {
                        error!("failed to read from bridge: {}", e);
                        break;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => {
                        let shutdown = matches!(command, BridgeCommand::Shutdown);
                        if let Err(e) = self.write(&command).await {
                            error!("failed to write to bridge: {}", e);
                            break;
                        }
                        if shutdown {
                            debug!("bridge shutdown sent");
                            break;
                        }
                    }
                    None => {
                        debug!("bridge transport dropped");
                        break;
                    }
                },
            }
        }
    }

    /// Handles one line of bridge output.
    ///
    /// Returns `false` when the connection must stop.
    async fn handle_line(&mut self, line: &str) -> bool {
        let event = match serde_json::from_str::<BridgeEvent>(line) {
            Ok(event) => event,
            Err(e) => {
                warn!("ignore unparseable bridge line: {}", e);
                return true;
            }
        };

        match event {
            BridgeEvent::Events { unit } => {
                if self.units.send(unit).is_err() {
                    debug!("event stream dropped");
                    return false;
                }
                true
            }
            BridgeEvent::Response {
                request_id,
                ok,
                result,
                error,
            } => {
                let Some(tx) = self.pending.lock().await.remove(&request_id) else {
                    debug!("ignore response to unknown request {}", request_id);
                    return true;
                };
                let outcome = match ok {
                    true => Ok(result),
                    false => Err(TransportError::Rejected(
                        error.unwrap_or_else(|| "unknown error".to_string()),
                    )),
                };
                let _ = tx.send(outcome);
                true
            }
            BridgeEvent::KeysGet {
                request_id,
                category,
                ids,
            } => {
                match self.keys.get_keys(&category, &ids).await {
                    Ok(keys) => {
                        self.reply(&BridgeCommand::KeysResult { request_id, keys })
                            .await
                    }
                    Err(e) => {
                        error!("failed to read {} keys: {}", category, e);
                        self.abort().await
                    }
                }
            }
            BridgeEvent::KeysSet { changes } => match self.keys.set_keys(changes).await {
                Ok(()) => true,
                Err(e) => {
                    error!("failed to store key material: {}", e);
                    self.abort().await
                }
            },
            BridgeEvent::GroupMetadataRequest {
                request_id,
                group_id,
            } => {
                let metadata = self.groups.group_metadata(&group_id);
                self.reply(&BridgeCommand::GroupMetadata {
                    request_id,
                    metadata,
                })
                .await
            }
        }
    }

    /// Stops the bridge after a key store failure, ending the session attempt.
    async fn abort(&mut self) -> bool {
        self.close_reason = DisconnectReason::ConnectionClosed;
        if let Err(e) = self.write(&BridgeCommand::Shutdown).await {
            debug!("failed to send shutdown to bridge: {}", e);
        }
        false
    }

    async fn reply(&mut self, command: &BridgeCommand) -> bool {
        match self.write(command).await {
            Ok(()) => true,
            Err(e) => {
                error!("failed to answer the bridge: {}", e);
                false
            }
        }
    }

    async fn write(&mut self, command: &BridgeCommand) -> Result<(), TransportError> {
        let line = command
            .to_line()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

async fn reap(child: &mut Child) {
    match time::timeout(SHUTDOWN_GRACE, child.wait()).await {
        Ok(Ok(status)) => info!("bridge exited with {}", status),
        Ok(Err(e)) => error!("failed to wait for bridge: {}", e),
        Err(_) => {
            warn!("bridge did not exit in time, killing it");
            if let Err(e) = child.kill().await {
                error!("failed to kill bridge: {}", e);
            }
        }
    }
}
