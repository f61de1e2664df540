//! Frame pipeline
//!
//! The pipeline drives the wall at a fixed rate. Each tick it:
//!
//! 1. Drains received universe updates into the `UniverseStore`
//! 2. Hands the store to the compute worker and waits a bounded time
//! 3. Packs the resulting frame into universe payloads
//! 4. Sends every payload, then publishes a snapshot for the API
//!
//! A compute result that misses budget + grace is discarded and the previous
//! frame is re-sent, so outbound frames always go out in tick order.

mod clock;
mod snapshot;
mod worker;

pub use clock::{FrameClock, Schedule};
pub use snapshot::{
    EffectInfo, FrameSource, OutputUniverse, PreviewSnapshot, SnapshotCell, StatusSummary,
    UniverseSnapshot,
};
pub use worker::{CommandReply, ComputeWorker, ManagerCommand, ManagerReport, PendingCommand, WorkerResult};

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::artnet::DmxTransport;
use crate::effects::{EffectManager, EffectRegistry, EffectSelector, LifecycleState, SelectorConfig, TickStatus};
use crate::error::{ConfigError, StartupError};
use crate::frame::PixelFrame;
use crate::layout::PhysicalLayout;
use crate::mapping::ChannelMapper;
use crate::settings::LedWallSettings;
use crate::telemetry::{FrameProfiler, PipelineMetrics, PipelineStats};
use crate::universe::{ApplyOutcome, UniverseStore};
use worker::WorkerJob;

/// Commands accepted by the pipeline between ticks
#[derive(Debug)]
pub enum PipelineCommand {
    /// Forwarded to the effect manager on the compute thread
    Manager {
        command: ManagerCommand,
        reply: Option<CommandReply>,
    },
    /// Stop and rebuild every component from fresh settings
    ReloadSettings,
    Shutdown,
}

impl PipelineCommand {
    pub fn manager(command: ManagerCommand) -> Self {
        Self::Manager { command, reply: None }
    }
}

/// Why `Pipeline::run` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineExit {
    Shutdown,
    Reload,
}

/// Events pushed to WebSocket clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Full status (sent on connect and once per second)
    Status(StatusSummary),
    /// Per-tick update
    Tick { tick: u64, source: FrameSource, fps: f64 },
    EffectChanged { effect: Option<String> },
    EffectFaulted { effect: String, error: Option<String> },
    Reloading,
}

/// Where the pipeline publishes snapshots and events
///
/// Outlives any one pipeline so the API keeps its handles across reloads.
#[derive(Debug, Clone)]
pub struct Publisher {
    snapshot: Arc<SnapshotCell>,
    events: broadcast::Sender<PipelineEvent>,
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            snapshot: Arc::new(SnapshotCell::default()),
            events,
        }
    }

    pub fn snapshot(&self) -> Arc<PreviewSnapshot> {
        self.snapshot.load()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn publish(&self, snapshot: PreviewSnapshot) -> bool {
        self.snapshot.publish(snapshot)
    }

    pub fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Fixed-rate receive → compute → pack → send loop
pub struct Pipeline {
    transport: Box<dyn DmxTransport>,
    layout: PhysicalLayout,
    store: UniverseStore,
    worker: ComputeWorker,
    clock: FrameClock,
    publisher: Publisher,
    sequence_tolerance: u8,
    receive_wait: Duration,
    /// Compute budget plus grace
    result_wait: Duration,
    target_fps: u32,
    tick: u64,
    /// Tick of the job the worker is busy with
    in_flight: Option<u64>,
    pending: Vec<PendingCommand>,
    last_frame: PixelFrame,
    last_source: FrameSource,
    report: ManagerReport,
    outputs: Arc<Vec<OutputUniverse>>,
    effects: Arc<Vec<EffectInfo>>,
    stats: PipelineStats,
    tick_profiler: FrameProfiler,
    compute_profiler: FrameProfiler,
    closed: bool,
}

impl Pipeline {
    /// Build every component from settings
    ///
    /// Invalid configuration is reported here and never later.
    pub fn new(
        settings: &LedWallSettings,
        registry: EffectRegistry,
        transport: Box<dyn DmxTransport>,
        publisher: Publisher,
    ) -> Result<Self, StartupError> {
        settings.validate()?;
        let (width, height) = settings.shape();

        let layout = PhysicalLayout::new(width, height, settings.layout.clone())?;
        let mapper = ChannelMapper::new(&registry, &settings.mappings, settings.auto_patch)?;
        let selector = settings
            .selector
            .clone()
            .map(|config| EffectSelector::new(config, &registry))
            .transpose()?;
        check_input_universes(&layout, &mapper, settings.selector.as_ref())?;
        if !registry.contains(&settings.effects.default_effect) {
            return Err(ConfigError::UnknownEffect(settings.effects.default_effect.clone()).into());
        }

        let effects: Vec<EffectInfo> = registry
            .ordered_types()
            .iter()
            .filter_map(|id| registry.get(id))
            .map(|def| EffectInfo {
                id: def.effect_type().to_string(),
                name: def.display_name().to_string(),
                category: def.category().to_string(),
                description: def.description().to_string(),
                inputs: def.inputs(),
                mappings: mapper.mappings_for(def.effect_type()),
            })
            .collect();
        let outputs: Vec<OutputUniverse> = layout
            .universes()
            .map(|(address, length)| OutputUniverse {
                address,
                port_address: address.to_u16(),
                length,
            })
            .collect();

        let mut manager = EffectManager::new(
            registry,
            mapper,
            (width, height),
            settings.fault_policy(),
            settings.effects.transition,
            selector,
        );
        manager.select(&settings.effects.default_effect)?;
        let worker = ComputeWorker::spawn(manager)?;

        tracing::info!(
            width,
            height,
            fps = settings.frame_rate,
            universes = layout.universe_count(),
            effect = %settings.effects.default_effect,
            "Pipeline initialized"
        );

        let mut initial = PreviewSnapshot::empty(width, height);
        initial.outputs = Arc::new(outputs.clone());
        initial.effects = Arc::new(effects.clone());
        publisher.publish(initial);

        Ok(Self {
            transport,
            layout,
            store: UniverseStore::new(),
            worker,
            clock: FrameClock::new(settings.frame_period(), Instant::now()),
            publisher,
            sequence_tolerance: settings.network.sequence_tolerance,
            receive_wait: settings.network.receive_wait(),
            result_wait: settings.compute_budget() + settings.grace(),
            target_fps: settings.frame_rate,
            tick: 0,
            in_flight: None,
            pending: Vec::new(),
            last_frame: PixelFrame::new(width, height),
            last_source: FrameSource::Idle,
            report: ManagerReport::default(),
            outputs: Arc::new(outputs),
            effects: Arc::new(effects),
            stats: PipelineStats::default(),
            tick_profiler: FrameProfiler::new(),
            compute_profiler: FrameProfiler::new(),
            closed: false,
        })
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Frame most recently sent (or re-sent)
    pub fn last_frame(&self) -> &PixelFrame {
        &self.last_frame
    }

    pub fn layout(&self) -> &PhysicalLayout {
        &self.layout
    }

    pub fn active_effect(&self) -> Option<&str> {
        self.report.active_effect.as_deref()
    }

    pub fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics {
            tick_stats: self.tick_profiler.stats(),
            compute_stats: self.compute_profiler.stats(),
            fps: self.tick_profiler.fps(),
            target_fps: self.target_fps,
            counters: self.stats,
        }
    }

    /// Run until shut down or asked to reload
    ///
    /// The pipeline is shut down before this returns.
    pub fn run(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<PipelineCommand>,
        running: &AtomicBool,
    ) -> PipelineExit {
        self.clock = FrameClock::new(self.clock.period(), Instant::now());
        tracing::info!(fps = self.target_fps, "Pipeline running");

        let exit = loop {
            if !running.load(Ordering::Acquire) {
                break PipelineExit::Shutdown;
            }
            let skipped = self.clock.wait();
            if skipped > 0 {
                self.stats.ticks_skipped += skipped;
                tracing::debug!(skipped, "Pipeline fell behind, skipping deadlines");
            }
            if let Some(exit) = self.drain_commands(commands) {
                break exit;
            }
            self.run_tick();
        };

        self.shutdown();
        exit
    }

    fn drain_commands(&mut self, commands: &mut mpsc::UnboundedReceiver<PipelineCommand>) -> Option<PipelineExit> {
        while let Ok(command) = commands.try_recv() {
            if let Some(exit) = self.handle_command(command) {
                return Some(exit);
            }
        }
        None
    }

    /// Queue a command for the next tick
    ///
    /// Returns how the loop should exit, for commands that end it.
    pub fn handle_command(&mut self, command: PipelineCommand) -> Option<PipelineExit> {
        match command {
            PipelineCommand::Manager { command, reply } => {
                self.pending.push(PendingCommand { command, reply });
                None
            }
            PipelineCommand::ReloadSettings => {
                tracing::info!("Settings reload requested");
                self.publisher.emit(PipelineEvent::Reloading);
                Some(PipelineExit::Reload)
            }
            PipelineCommand::Shutdown => Some(PipelineExit::Shutdown),
        }
    }

    /// Run one tick immediately
    pub fn run_tick(&mut self) -> FrameSource {
        self.tick += 1;
        let tick = self.tick;
        self.stats.ticks += 1;
        self.tick_profiler.begin_frame();

        self.receive();
        self.collect_late_results();

        let source = self.compute(tick);
        if source != FrameSource::Fresh {
            self.stats.frames_reused += 1;
        }
        if self.send_frame() {
            self.stats.frames_sent += 1;
        }

        self.last_source = source;
        self.publish();
        source
    }

    fn receive(&mut self) {
        for update in self.transport.receive(self.receive_wait) {
            if self.store.apply(update, self.sequence_tolerance) == ApplyOutcome::AppliedStale {
                self.stats.stale_packets += 1;
            }
        }
        let counters = self.transport.counters();
        self.stats.packets_received = counters.packets_received;
        self.stats.protocol_errors = counters.protocol_errors;
        self.stats.updates_dropped = counters.updates_dropped;
    }

    fn collect_late_results(&mut self) {
        while let Ok(result) = self.worker.try_recv() {
            self.absorb_late(result);
        }
    }

    fn compute(&mut self, tick: u64) -> FrameSource {
        if self.in_flight.is_none() {
            let job = WorkerJob::Tick {
                tick,
                store: self.store.clone(),
                commands: std::mem::take(&mut self.pending),
            };
            match self.worker.submit(job) {
                Ok(()) => self.in_flight = Some(tick),
                Err(dropped) => {
                    tracing::error!(commands = dropped.len(), "Effect compute thread is not accepting work");
                    return FrameSource::Late;
                }
            }
        }
        if self.in_flight != Some(tick) {
            // Worker still busy with an earlier tick
            return FrameSource::Late;
        }

        let deadline = Instant::now() + self.result_wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.worker.recv_timeout(remaining) {
                Ok(result) if result.tick == tick => {
                    self.in_flight = None;
                    return self.accept(result);
                }
                Ok(result) => self.absorb_late(result),
                Err(RecvTimeoutError::Timeout) => {
                    self.stats.compute_timeouts += 1;
                    tracing::warn!(
                        tick,
                        wait_ms = self.result_wait.as_secs_f64() * 1000.0,
                        "Compute missed its deadline, re-sending previous frame"
                    );
                    return FrameSource::Late;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::error!("Effect compute thread stopped unexpectedly");
                    return FrameSource::Late;
                }
            }
        }
    }

    fn accept(&mut self, result: WorkerResult) -> FrameSource {
        self.compute_profiler.record(result.compute_time);
        let source = match &result.status {
            TickStatus::Fresh => FrameSource::Fresh,
            TickStatus::Reused(_) => {
                self.stats.effect_faults += 1;
                FrameSource::Reused
            }
            TickStatus::Frozen => FrameSource::Frozen,
            TickStatus::Idle => FrameSource::Idle,
        };
        self.last_frame = result.frame;
        self.update_report(result.report);
        source
    }

    /// A result that arrived after its tick gave up on it
    fn absorb_late(&mut self, result: WorkerResult) {
        if self.in_flight == Some(result.tick) {
            self.in_flight = None;
        }
        tracing::debug!(tick = result.tick, current = self.tick, "Discarding late compute result");
        self.compute_profiler.record(result.compute_time);
        if matches!(result.status, TickStatus::Reused(_)) {
            self.stats.effect_faults += 1;
        }
        self.update_report(result.report);
    }

    fn update_report(&mut self, report: ManagerReport) {
        if report.active_effect != self.report.active_effect {
            self.publisher.emit(PipelineEvent::EffectChanged {
                effect: report.active_effect.clone(),
            });
        }

        let was_faulted = self
            .report
            .status
            .as_ref()
            .is_some_and(|s| s.state == LifecycleState::Faulted && Some(&s.effect) == report.active_effect.as_ref());
        if let Some(status) = report.status.as_ref().filter(|s| s.state == LifecycleState::Faulted) {
            if !was_faulted {
                self.publisher.emit(PipelineEvent::EffectFaulted {
                    effect: status.effect.clone(),
                    error: status.last_error.clone(),
                });
            }
        }

        self.report = report;
    }

    /// Send the current frame; a failed universe drops the rest of the frame
    fn send_frame(&mut self) -> bool {
        let payloads = self.layout.pack(&self.last_frame);
        for (address, payload) in &payloads {
            if let Err(e) = self.transport.send(*address, payload) {
                self.stats.send_failures += 1;
                tracing::warn!(tick = self.tick, universe = %address, error = %e, "Send failed, dropping frame");
                return false;
            }
        }
        true
    }

    fn publish(&mut self) {
        let now = Instant::now();
        let universes = self
            .store
            .iter()
            .map(|u| UniverseSnapshot {
                address: u.address,
                port_address: u.address.to_u16(),
                sequence: u.sequence,
                stale: u.stale,
                age_ms: now.duration_since(u.last_received).as_millis() as u64,
                channels: u.channels.clone(),
            })
            .collect();

        let (width, height) = self.layout.shape();
        let metrics = self.metrics();
        let fps = metrics.fps;
        let snapshot = PreviewSnapshot {
            tick: self.tick,
            width,
            height,
            frame: self.last_frame.clone(),
            source: self.last_source,
            active_effect: self.report.active_effect.clone(),
            effect_status: self.report.status.clone(),
            inputs: self.report.inputs.clone(),
            overrides: self.report.overrides.clone(),
            universes,
            outputs: Arc::clone(&self.outputs),
            effects: Arc::clone(&self.effects),
            metrics,
        };

        if self.tick % u64::from(self.target_fps.max(1)) == 0 {
            self.publisher.emit(PipelineEvent::Status(StatusSummary::from(&snapshot)));
        }
        self.publisher.emit(PipelineEvent::Tick {
            tick: self.tick,
            source: self.last_source,
            fps,
        });
        self.publisher.publish(snapshot);
    }

    /// Stop the worker (deactivating the effect) and close the transport
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Dropping pending replies tells waiting callers the pipeline is gone
        self.pending.clear();
        self.worker.shutdown();
        self.transport.close();
        tracing::info!(
            ticks = self.stats.ticks,
            frames_sent = self.stats.frames_sent,
            frames_reused = self.stats.frames_reused,
            "Pipeline stopped"
        );
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reject control universes the wall itself transmits on
///
/// The receive socket also hears broadcast output, so a shared universe would
/// feed rendered pixels back in as effect inputs.
fn check_input_universes(
    layout: &PhysicalLayout,
    mapper: &ChannelMapper,
    selector: Option<&SelectorConfig>,
) -> Result<(), ConfigError> {
    let outputs: BTreeSet<u16> = layout.universes().map(|(address, _)| address.to_u16()).collect();
    let inputs = mapper
        .universes()
        .into_iter()
        .chain(selector.map(|config| config.universe));
    for universe in inputs {
        if outputs.contains(&universe) {
            return Err(ConfigError::InputOverlapsOutput(universe));
        }
    }
    Ok(())
}
