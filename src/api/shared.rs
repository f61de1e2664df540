//! Shared state between the API server and the pipeline
//!
//! Handlers read the latest published snapshot and push commands over an
//! unbounded channel that the pipeline drains once per tick.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::ConfigError;
use crate::pipeline::{ManagerCommand, PipelineCommand, PipelineEvent, PreviewSnapshot, Publisher};

/// How long a handler waits for the pipeline to apply a command
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a command did not apply
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("pipeline is not running")]
    Unavailable,
    #[error("pipeline did not answer in time")]
    Timeout,
    #[error(transparent)]
    Rejected(#[from] ConfigError),
}

/// Shared state accessible by API handlers
pub struct SharedState {
    publisher: Publisher,
    /// Channel to send commands to the pipeline
    pub command_tx: mpsc::UnboundedSender<PipelineCommand>,
    started: Instant,
}

pub type SharedStateHandle = Arc<SharedState>;

impl SharedState {
    pub fn new(publisher: Publisher, command_tx: mpsc::UnboundedSender<PipelineCommand>) -> Self {
        Self {
            publisher,
            command_tx,
            started: Instant::now(),
        }
    }

    /// Latest published snapshot
    pub fn get_snapshot(&self) -> Arc<PreviewSnapshot> {
        self.publisher.snapshot()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Queue a command without waiting for it
    pub fn send_command(&self, cmd: PipelineCommand) -> Result<(), CommandError> {
        self.command_tx.send(cmd).map_err(|_| CommandError::Unavailable)
    }

    /// Queue a manager command and wait until the compute thread applied it
    pub async fn request(&self, command: ManagerCommand) -> Result<(), CommandError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(PipelineCommand::Manager {
            command,
            reply: Some(reply_tx),
        })?;

        match tokio::time::timeout(COMMAND_TIMEOUT, reply_rx).await {
            Ok(Ok(outcome)) => outcome.map_err(CommandError::from),
            Ok(Err(_)) => Err(CommandError::Unavailable),
            Err(_) => Err(CommandError::Timeout),
        }
    }

    /// Subscribe to WebSocket events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.publisher.subscribe()
    }
}
