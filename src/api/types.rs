//! API request/response types
//!
//! These types are used for JSON serialization in API endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::effects::{LifecycleState, RuntimeStatus};
use crate::mapping::{EffectInputs, InputValue};
use crate::pipeline::{EffectInfo, FrameSource, OutputUniverse, PreviewSnapshot, UniverseSnapshot};

// ============================================================================
// Status Types
// ============================================================================

/// Server status response
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub tick: u64,
    pub width: usize,
    pub height: usize,
    pub active_effect: Option<String>,
    pub state: Option<LifecycleState>,
    pub source: FrameSource,
    pub fps: f64,
    pub target_fps: u32,
}

// ============================================================================
// Frame Types
// ============================================================================

/// Raw RGBW frame, row-major
#[derive(Debug, Clone, Serialize)]
pub struct FrameResponse {
    pub tick: u64,
    pub width: usize,
    pub height: usize,
    pub source: FrameSource,
    pub pixels: Vec<[u8; 4]>,
}

impl From<&PreviewSnapshot> for FrameResponse {
    fn from(snap: &PreviewSnapshot) -> Self {
        Self {
            tick: snap.tick,
            width: snap.width,
            height: snap.height,
            source: snap.source,
            pixels: snap.frame.pixels().iter().map(|p| p.to_array()).collect(),
        }
    }
}

/// RGB preview with white folded in, one row per entry
#[derive(Debug, Clone, Serialize)]
pub struct PreviewResponse {
    pub tick: u64,
    pub width: usize,
    pub height: usize,
    pub rows: Vec<Vec<[u8; 3]>>,
}

// ============================================================================
// Effect Types
// ============================================================================

/// Decoded inputs of the active effect
#[derive(Debug, Clone, Serialize)]
pub struct InputsResponse {
    pub effect: Option<String>,
    pub inputs: EffectInputs,
    pub overrides: BTreeMap<String, InputValue>,
}

/// Registered effects and the active one
#[derive(Debug, Clone, Serialize)]
pub struct EffectsResponse {
    pub active: Option<String>,
    pub status: Option<RuntimeStatus>,
    pub effects: Vec<EffectInfo>,
}

/// Select effect request
#[derive(Debug, Clone, Deserialize)]
pub struct SelectEffectRequest {
    pub effect: String,
}

/// Pin an input to a value
#[derive(Debug, Clone, Deserialize)]
pub struct OverrideRequest {
    pub value: InputValue,
}

// ============================================================================
// Universe Types
// ============================================================================

/// Received and transmitted universes
#[derive(Debug, Clone, Serialize)]
pub struct UniversesResponse {
    pub inputs: Vec<UniverseSnapshot>,
    pub outputs: Vec<OutputUniverse>,
}

// ============================================================================
// Generic Types
// ============================================================================

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// Acknowledgement for accepted commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { message: msg.into() }
    }
}
