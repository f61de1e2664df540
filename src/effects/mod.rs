//! Effects system
//!
//! Effects turn decoded DMX inputs into pixel frames. Exactly one effect is
//! active at a time.
//!
//! # Architecture
//!
//! - **Traits** (`traits.rs`): `EffectDefinition` factory trait with a declared
//!   input schema, and the `Effect` instance trait with lifecycle hooks
//! - **Registry** (`registry.rs`): Static table of available effects
//! - **Runtime** (`runtime.rs`): Lifecycle state machine and fault containment
//!   around one effect instance
//! - **Transition** (`transition.rs`): Cut or crossfade on effect switches
//! - **Manager** (`manager.rs`): Owns the active runtime, selection, manual
//!   overrides and the DMX effect selector
//! - **Builtin** (`builtin/`): Built-in effects (single_color, gradient, etc.)
//!
//! # Usage
//!
//! ```ignore
//! let mut registry = EffectRegistry::new();
//! builtin::register_builtin_effects(&mut registry);
//! let mapper = ChannelMapper::new(&registry, &[], Some(AutoPatch::default()))?;
//!
//! let mut manager = EffectManager::new(
//!     registry,
//!     mapper,
//!     (30, 58),
//!     FaultPolicy::default(),
//!     TransitionPolicy::Cut,
//!     None,
//! );
//! manager.select("single_color")?;
//! let (frame, _status) = manager.tick(1, &universe_store);
//! ```

mod traits;
mod registry;
mod runtime;
mod transition;
mod manager;
pub mod builtin;

pub use traits::*;
pub use registry::*;
pub use runtime::*;
pub use transition::*;
pub use manager::*;
pub use builtin::register_builtin_effects;
