//! Error taxonomy
//!
//! Each failure class has its own type so the pipeline can decide how far it
//! travels: protocol errors are dropped per packet, effect errors are contained
//! per effect, and only configuration and network errors raised at startup end
//! the process.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// A received datagram that is not a usable ArtDmx packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),
    #[error("bad packet identifier")]
    BadIdentifier,
    #[error("unsupported opcode 0x{0:04x}")]
    UnsupportedOpcode(u16),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),
    #[error("declared length {declared} does not match {available} available bytes")]
    LengthMismatch { declared: usize, available: usize },
    #[error("data length {0} outside 2..=512")]
    InvalidLength(usize),
}

/// Invalid configuration, detected while building components.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("matrix dimensions must be non-zero (got {width}x{height})")]
    EmptyMatrix { width: usize, height: usize },
    #[error("frame rate must be between 1 and 240 (got {0})")]
    InvalidFrameRate(u32),
    #[error("universe capacity must be between 4 and 512 channels (got {0})")]
    InvalidCapacity(usize),
    #[error("universe capacity {capacity} wastes {wasted} channels per universe, above the allowed fraction {max_fraction}")]
    ExcessiveWaste {
        capacity: usize,
        wasted: usize,
        max_fraction: f32,
    },
    #[error("layout needs port address {0}, beyond the 15-bit limit")]
    PortAddressOverflow(u32),
    #[error("run of {run} pixels does not fit a universe of {per_universe} pixels")]
    RunTooLong { run: usize, per_universe: usize },
    #[error("unknown effect '{0}'")]
    UnknownEffect(String),
    #[error("effect '{effect}' has no input named '{input}'")]
    UnknownInput { effect: String, input: String },
    #[error("mapping for {effect}.{input} uses rule {found}, input expects {expected}")]
    RuleMismatch {
        effect: String,
        input: String,
        expected: String,
        found: String,
    },
    #[error("mapping for {effect}.{input} covers channels {start}..{end}, beyond 512")]
    RangeOutOfBounds {
        effect: String,
        input: String,
        start: usize,
        end: usize,
    },
    #[error("mappings for {effect}.{first} and {effect}.{second} overlap in universe {universe}")]
    OverlappingRanges {
        effect: String,
        first: String,
        second: String,
        universe: u16,
    },
    #[error("universe {0} is both a control input and a wall output")]
    InputOverlapsOutput(u16),
    #[error("invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },
}

/// Failure of a single effect, contained by the runtime.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EffectError {
    #[error("compute failed: {0}")]
    Compute(String),
    #[error("activation failed: {0}")]
    Activation(String),
    #[error("deactivation failed: {0}")]
    Deactivation(String),
    #[error("output shape {found:?} does not match configured shape {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("compute took {elapsed_ms:.2}ms, budget is {budget_ms:.2}ms")]
    Overrun { elapsed_ms: f64, budget_ms: f64 },
}

/// Socket level failures.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to send universe {universe}: {source}")]
    Send {
        universe: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("transport is closed")]
    Closed,
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Settings file errors.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write settings file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("'{0}' is not an object and cannot hold child keys")]
    NotAnObject(String),
    #[error("key path is empty")]
    EmptyKey,
    #[error("could not find config directory")]
    NoConfigDir,
}

/// Errors that stop the process before the pipeline starts.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("failed to spawn {name} thread: {source}")]
    Thread {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}
