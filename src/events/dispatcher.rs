//! Fan-out of live messages to the command engine and the message recorder.
//!
//! Every message of a `notify` batch is normalized in arrival order and handed,
//! as one shared [`NormalizedMessage`], to two independent tasks. Neither task is
//! awaited before the next message: a slow or failing consumer only affects its
//! own message.
//!
//! Each task holds a permit of a semaphore sized by `max_in_flight` and runs under
//! `task_timeout`. When every permit is taken, dispatch waits for one to be
//! released, which is the only way a consumer can slow down ingestion. Errors,
//! panics and timeouts are sent on a channel drained by a reporter task.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, error, warn};
use mockall::automock;
use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinHandle,
    time,
};

use crate::{
    events::message::{NormalizedMessage, normalize},
    metadata::MetadataCache,
    transport::{BatchKind, MessageBatch},
    utils::truncate,
};

/// Consumer interpreting messages as bot commands.
#[automock]
#[async_trait]
pub trait CommandEngine: Send + Sync {
    async fn run_command(&self, message: &NormalizedMessage) -> anyhow::Result<()>;
}

/// Consumer persisting messages.
#[automock]
#[async_trait]
pub trait MessageRecorder: Send + Sync {
    async fn record_message(&self, message: &NormalizedMessage) -> anyhow::Result<()>;
}

/// Limits applied to per-message tasks.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    /// Maximum number of consumer tasks running at once
    pub max_in_flight: usize,
    /// Maximum lifetime of one consumer task
    pub task_timeout: Duration,
}

/// Which consumer a task was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumer {
    CommandEngine,
    Recorder,
}

impl fmt::Display for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Consumer::CommandEngine => write!(f, "command engine"),
            Consumer::Recorder => write!(f, "recorder"),
        }
    }
}

/// A consumer task that did not complete successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchFailure {
    pub message_id: String,
    pub consumer: Consumer,
    pub error: String,
}

pub struct MessageDispatcher {
    engine: Arc<dyn CommandEngine>,
    recorder: Arc<dyn MessageRecorder>,
    cache: Arc<MetadataCache>,
    permits: Arc<Semaphore>,
    task_timeout: Duration,
    failures: mpsc::UnboundedSender<DispatchFailure>,
}

impl MessageDispatcher {
    /// Creates a dispatcher and the receiving end of its failure channel.
    pub fn new(
        engine: Arc<dyn CommandEngine>,
        recorder: Arc<dyn MessageRecorder>,
        cache: Arc<MetadataCache>,
        settings: DispatchSettings,
    ) -> (Self, mpsc::UnboundedReceiver<DispatchFailure>) {
        let (failures, failures_rx) = mpsc::unbounded_channel();
        let dispatcher = MessageDispatcher {
            engine,
            recorder,
            cache,
            permits: Arc::new(Semaphore::new(settings.max_in_flight.max(1))),
            task_timeout: settings.task_timeout,
            failures,
        };
        (dispatcher, failures_rx)
    }

    /// Dispatches every message of a live batch.
    ///
    /// Replayed (`append`) batches are skipped.
    ///
    /// # Returns
    ///
    /// The number of dispatched messages.
    pub async fn dispatch_batch(&self, batch: MessageBatch, own_identity: Option<&str>) -> usize {
        if batch.kind != BatchKind::Notify {
            debug!("skip {} replayed messages", batch.messages.len());
            return 0;
        }

        let mut dispatched = 0;
        for raw in batch.messages {
            match normalize(raw, own_identity, &self.cache) {
                Ok(message) => {
                    self.dispatch(Arc::new(message)).await;
                    dispatched += 1;
                }
                Err(e) => warn!("skip message: {}", e),
            }
        }
        dispatched
    }

    async fn dispatch(&self, message: Arc<NormalizedMessage>) {
        debug!(
            "dispatch message {} from {}: {}",
            message.id,
            message.sender,
            truncate(&message.text, 40)
        );

        let engine = Arc::clone(&self.engine);
        self.spawn(Consumer::CommandEngine, Arc::clone(&message), move |m| async move {
            engine.run_command(&m).await
        })
        .await;

        let recorder = Arc::clone(&self.recorder);
        self.spawn(Consumer::Recorder, message, move |m| async move {
            recorder.record_message(&m).await
        })
        .await;
    }

    async fn spawn<F, Fut>(&self, consumer: Consumer, message: Arc<NormalizedMessage>, run: F)
    where
        F: FnOnce(Arc<NormalizedMessage>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            error!("dispatch semaphore closed, drop message {}", message.id);
            return;
        };

        let failures = self.failures.clone();
        let task_timeout = self.task_timeout;
        let message_id = message.id.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let mut task = tokio::spawn(run(message));

            let error = match time::timeout(task_timeout, &mut task).await {
                Ok(Ok(Ok(()))) => return,
                Ok(Ok(Err(e))) => format!("{:#}", e),
                Ok(Err(e)) if e.is_panic() => "task panicked".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(_) => {
                    task.abort();
                    format!("timed out after {:?}", task_timeout)
                }
            };

            let _ = failures.send(DispatchFailure {
                message_id,
                consumer,
                error,
            });
        });
    }
}

/// Spawns the task logging dispatch failures until every dispatcher is dropped.
pub fn spawn_failure_reporter(
    mut failures: mpsc::UnboundedReceiver<DispatchFailure>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(failure) = failures.recv().await {
            error!(
                "{} failed on message {}: {}",
                failure.consumer, failure.message_id, failure.error
            );
        }
    })
}
