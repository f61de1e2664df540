//! LED Wall Server Library
//!
//! Drives an RGBW LED matrix over Art-Net: receives DMX control universes,
//! runs the selected effect at a fixed frame rate, and sends the rendered
//! frame back out as DMX. A small REST/WebSocket API exposes the live state.

pub mod api;
pub mod artnet;
pub mod effects;
pub mod error;
pub mod frame;
pub mod layout;
pub mod mapping;
pub mod pipeline;
pub mod settings;
pub mod telemetry;
pub mod universe;

pub use artnet::{ArtDmx, DmxTransport, MemoryTransport, UdpTransport};
pub use effects::{register_builtin_effects, EffectManager, EffectRegistry};
pub use error::{ConfigError, EffectError, NetworkError, ProtocolError, SettingsError, StartupError};
pub use frame::{PixelFrame, Rgbw};
pub use layout::PhysicalLayout;
pub use pipeline::{Pipeline, PipelineCommand, PipelineEvent, PipelineExit, PreviewSnapshot, Publisher};
pub use settings::{LedWallSettings, SettingsStore};
pub use universe::{PortAddress, UniverseStore};
