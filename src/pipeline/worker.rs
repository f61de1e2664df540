//! Compute worker thread
//!
//! The worker owns the `EffectManager`, so effects only ever run on this
//! thread. The pipeline hands it one job at a time over a bounded channel
//! and waits a bounded time for the result.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::effects::{EffectManager, RuntimeStatus, TickStatus};
use crate::error::{ConfigError, StartupError};
use crate::frame::PixelFrame;
use crate::mapping::{EffectInputs, InputValue};
use crate::universe::UniverseStore;

/// Reply slot for a command that can fail
pub type CommandReply = oneshot::Sender<Result<(), ConfigError>>;

/// Operation on the effect manager
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerCommand {
    Select(String),
    Reset,
    SetOverride { input: String, value: InputValue },
    ClearOverrides,
}

/// A manager command waiting to run on the worker
#[derive(Debug)]
pub struct PendingCommand {
    pub command: ManagerCommand,
    pub reply: Option<CommandReply>,
}

pub(crate) enum WorkerJob {
    Tick {
        tick: u64,
        store: UniverseStore,
        commands: Vec<PendingCommand>,
    },
    Shutdown,
}

/// Manager state after a tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagerReport {
    pub active_effect: Option<String>,
    pub status: Option<RuntimeStatus>,
    pub inputs: EffectInputs,
    pub overrides: BTreeMap<String, InputValue>,
}

impl ManagerReport {
    fn from_manager(manager: &EffectManager) -> Self {
        Self {
            active_effect: manager.active_effect().map(str::to_string),
            status: manager.status(),
            inputs: manager.latest_inputs().clone(),
            overrides: manager.overrides().clone(),
        }
    }
}

/// Output of one job
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub tick: u64,
    pub frame: PixelFrame,
    pub status: TickStatus,
    pub compute_time: Duration,
    pub report: ManagerReport,
}

/// Handle to the compute thread
pub struct ComputeWorker {
    job_tx: SyncSender<WorkerJob>,
    result_rx: Receiver<WorkerResult>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ComputeWorker {
    /// Move the manager onto a new compute thread
    pub fn spawn(manager: EffectManager) -> Result<Self, StartupError> {
        let (job_tx, job_rx) = mpsc::sync_channel::<WorkerJob>(1);
        let (result_tx, result_rx) = mpsc::sync_channel::<WorkerResult>(1);

        let thread_handle = thread::Builder::new()
            .name("effect-compute".into())
            .spawn(move || worker_loop(manager, job_rx, result_tx))
            .map_err(|source| StartupError::Thread {
                name: "effect-compute",
                source,
            })?;

        Ok(Self {
            job_tx,
            result_rx,
            thread_handle: Some(thread_handle),
        })
    }

    /// Queue a tick without blocking
    ///
    /// On failure the job's commands are handed back.
    pub(crate) fn submit(&self, job: WorkerJob) -> Result<(), Vec<PendingCommand>> {
        self.job_tx.try_send(job).map_err(|e| {
            let job = match e {
                TrySendError::Full(job) | TrySendError::Disconnected(job) => job,
            };
            match job {
                WorkerJob::Tick { commands, .. } => commands,
                WorkerJob::Shutdown => Vec::new(),
            }
        })
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<WorkerResult, RecvTimeoutError> {
        self.result_rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<WorkerResult, TryRecvError> {
        self.result_rx.try_recv()
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }

    /// Stop the thread, deactivating the active effect before returning
    pub fn shutdown(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        // Drain a finished result so the worker never blocks on a full channel
        while self.result_rx.try_recv().is_ok() {}
        let _ = self.job_tx.send(WorkerJob::Shutdown);
        while !handle.is_finished() {
            match self.result_rx.recv_timeout(Duration::from_millis(10)) {
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        if handle.join().is_err() {
            tracing::error!("Effect compute thread panicked");
        }
    }
}

impl Drop for ComputeWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(mut manager: EffectManager, jobs: Receiver<WorkerJob>, results: SyncSender<WorkerResult>) {
    tracing::debug!("Effect compute thread started");

    while let Ok(job) = jobs.recv() {
        let (tick, store, commands) = match job {
            WorkerJob::Tick { tick, store, commands } => (tick, store, commands),
            WorkerJob::Shutdown => break,
        };

        for pending in commands {
            let outcome = apply_command(&mut manager, pending.command);
            if let Err(e) = &outcome {
                tracing::warn!(error = %e, "Effect command rejected");
            }
            if let Some(reply) = pending.reply {
                let _ = reply.send(outcome);
            }
        }

        let started = Instant::now();
        let (frame, status) = manager.tick(tick, &store);
        let result = WorkerResult {
            tick,
            frame,
            status,
            compute_time: started.elapsed(),
            report: ManagerReport::from_manager(&manager),
        };
        if results.send(result).is_err() {
            break;
        }
    }

    manager.shutdown();
    tracing::debug!("Effect compute thread stopped");
}

fn apply_command(manager: &mut EffectManager, command: ManagerCommand) -> Result<(), ConfigError> {
    match command {
        ManagerCommand::Select(name) => manager.select(&name),
        ManagerCommand::Reset => {
            manager.reset();
            Ok(())
        }
        ManagerCommand::SetOverride { input, value } => manager.set_override(&input, value),
        ManagerCommand::ClearOverrides => {
            manager.clear_overrides();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{register_builtin_effects, EffectRegistry, FaultPolicy, TransitionPolicy};
    use crate::mapping::{AutoPatch, ChannelMapper};

    fn manager() -> EffectManager {
        let mut registry = EffectRegistry::new();
        register_builtin_effects(&mut registry);
        let mapper = ChannelMapper::new(&registry, &[], Some(AutoPatch::default())).unwrap();
        EffectManager::new(
            registry,
            mapper,
            (4, 2),
            FaultPolicy::default(),
            TransitionPolicy::Cut,
            None,
        )
    }

    fn tick_job(tick: u64, commands: Vec<PendingCommand>) -> WorkerJob {
        WorkerJob::Tick {
            tick,
            store: UniverseStore::new(),
            commands,
        }
    }

    #[test]
    fn test_worker_runs_commands_then_tick() {
        let mut worker = ComputeWorker::spawn(manager()).unwrap();
        let (reply_tx, mut reply_rx) = oneshot::channel();
        let select = PendingCommand {
            command: ManagerCommand::Select("gradient".into()),
            reply: Some(reply_tx),
        };

        assert!(worker.submit(tick_job(1, vec![select])).is_ok());
        let result = worker.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.tick, 1);
        assert_eq!(result.frame.shape(), (4, 2));
        assert_eq!(result.status, TickStatus::Fresh);
        assert_eq!(result.report.active_effect.as_deref(), Some("gradient"));
        assert_eq!(reply_rx.try_recv(), Ok(Ok(())));

        worker.shutdown();
        assert!(!worker.is_running());
    }

    #[test]
    fn test_rejected_command_replies_with_error() {
        let worker = ComputeWorker::spawn(manager()).unwrap();
        let (reply_tx, mut reply_rx) = oneshot::channel();
        let select = PendingCommand {
            command: ManagerCommand::Select("nope".into()),
            reply: Some(reply_tx),
        };

        assert!(worker.submit(tick_job(1, vec![select])).is_ok());
        let result = worker.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.status, TickStatus::Idle);
        assert_eq!(
            reply_rx.try_recv(),
            Ok(Err(ConfigError::UnknownEffect("nope".into())))
        );
    }

    #[test]
    fn test_submit_after_shutdown_returns_commands() {
        let mut worker = ComputeWorker::spawn(manager()).unwrap();
        worker.shutdown();
        let pending = PendingCommand {
            command: ManagerCommand::Reset,
            reply: None,
        };
        let returned = worker.submit(tick_job(1, vec![pending])).unwrap_err();
        assert_eq!(returned.len(), 1);
    }
}
