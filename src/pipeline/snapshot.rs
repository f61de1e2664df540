//! Immutable pipeline snapshots for the API
//!
//! The pipeline is the single writer: it builds a fresh snapshot each tick
//! and swaps it in under `try_write`, skipping the swap if readers hold the
//! lock. Readers clone the `Arc` and never see a frame mid-write.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::effects::{InputSpec, LifecycleState, RuntimeStatus};
use crate::frame::PixelFrame;
use crate::mapping::{ChannelMapping, EffectInputs, InputValue};
use crate::telemetry::PipelineMetrics;
use crate::universe::PortAddress;

/// Where the tick's outbound frame came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameSource {
    /// Fresh compute result
    Fresh,
    /// Compute failed this tick, previous frame re-sent
    Reused,
    /// Effect is faulted, held frame re-sent
    Frozen,
    /// No active effect
    #[default]
    Idle,
    /// Compute missed its deadline, previous frame re-sent
    Late,
}

/// Static description of a registered effect
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectInfo {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub inputs: Vec<InputSpec>,
    pub mappings: Vec<ChannelMapping>,
}

/// One received universe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniverseSnapshot {
    pub address: PortAddress,
    pub port_address: u16,
    pub sequence: u8,
    pub stale: bool,
    /// Milliseconds since the last packet
    pub age_ms: u64,
    pub channels: Vec<u8>,
}

/// One outbound universe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputUniverse {
    pub address: PortAddress,
    pub port_address: u16,
    pub length: usize,
}

/// Everything the API can show about the pipeline at one tick
#[derive(Debug, Clone, Serialize)]
pub struct PreviewSnapshot {
    pub tick: u64,
    pub width: usize,
    pub height: usize,
    pub frame: PixelFrame,
    pub source: FrameSource,
    pub active_effect: Option<String>,
    pub effect_status: Option<RuntimeStatus>,
    pub inputs: EffectInputs,
    pub overrides: BTreeMap<String, InputValue>,
    pub universes: Vec<UniverseSnapshot>,
    pub outputs: Arc<Vec<OutputUniverse>>,
    pub effects: Arc<Vec<EffectInfo>>,
    pub metrics: PipelineMetrics,
}

impl PreviewSnapshot {
    /// Snapshot before the first tick
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            tick: 0,
            width,
            height,
            frame: PixelFrame::new(width, height),
            source: FrameSource::Idle,
            active_effect: None,
            effect_status: None,
            inputs: EffectInputs::new(),
            overrides: BTreeMap::new(),
            universes: Vec::new(),
            outputs: Arc::new(Vec::new()),
            effects: Arc::new(Vec::new()),
            metrics: PipelineMetrics::default(),
        }
    }
}

impl Default for PreviewSnapshot {
    fn default() -> Self {
        Self::empty(0, 0)
    }
}

/// Compact status pushed to WebSocket clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSummary {
    pub tick: u64,
    pub width: usize,
    pub height: usize,
    pub active_effect: Option<String>,
    pub state: Option<LifecycleState>,
    pub source: FrameSource,
    pub fps: f64,
    pub target_fps: u32,
    pub universes_in: usize,
    pub universes_out: usize,
}

impl From<&PreviewSnapshot> for StatusSummary {
    fn from(snap: &PreviewSnapshot) -> Self {
        Self {
            tick: snap.tick,
            width: snap.width,
            height: snap.height,
            active_effect: snap.active_effect.clone(),
            state: snap.effect_status.as_ref().map(|s| s.state),
            source: snap.source,
            fps: snap.metrics.fps,
            target_fps: snap.metrics.target_fps,
            universes_in: snap.universes.len(),
            universes_out: snap.outputs.len(),
        }
    }
}

/// Single-writer, many-reader snapshot slot
#[derive(Debug, Default)]
pub struct SnapshotCell {
    current: RwLock<Arc<PreviewSnapshot>>,
}

impl SnapshotCell {
    pub fn new(initial: PreviewSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Latest published snapshot
    pub fn load(&self) -> Arc<PreviewSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Swap in a new snapshot without blocking
    ///
    /// Returns false if readers held the lock; the next tick publishes again.
    pub fn publish(&self, snapshot: PreviewSnapshot) -> bool {
        match self.current.try_write() {
            Ok(mut guard) => {
                *guard = Arc::new(snapshot);
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_replaces_snapshot() {
        let cell = SnapshotCell::new(PreviewSnapshot::empty(2, 2));
        let before = cell.load();

        let mut next = PreviewSnapshot::empty(2, 2);
        next.tick = 7;
        assert!(cell.publish(next));

        assert_eq!(before.tick, 0);
        assert_eq!(cell.load().tick, 7);
    }

    #[test]
    fn test_publish_skips_while_read_locked() {
        let cell = SnapshotCell::new(PreviewSnapshot::empty(1, 1));
        let guard = cell.current.read().unwrap();
        assert!(!cell.publish(PreviewSnapshot::empty(1, 1)));
        drop(guard);
        assert!(cell.publish(PreviewSnapshot::empty(1, 1)));
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = PreviewSnapshot::empty(1, 1);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["source"], "idle");
        assert_eq!(json["width"], 1);
    }
}
