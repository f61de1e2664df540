//! Built-in effects
//!
//! This module contains the standard effects that ship with the server.

mod afterglow;
mod color_mix;
mod gradient;
mod single_color;
mod test_pattern;

pub use afterglow::{AfterglowDefinition, AfterglowRuntime};
pub use color_mix::{ColorMixDefinition, ColorMixRuntime, NoisePattern};
pub use gradient::{GradientDefinition, GradientRuntime};
pub use single_color::{SingleColorDefinition, SingleColorRuntime};
pub use test_pattern::{TestPatternDefinition, TestPatternRuntime};

use super::EffectRegistry;

/// Register all built-in effects with the registry
pub fn register_builtin_effects(registry: &mut EffectRegistry) {
    registry.register(AfterglowDefinition);
    registry.register(ColorMixDefinition);
    registry.register(GradientDefinition);
    registry.register(SingleColorDefinition);
    registry.register(TestPatternDefinition);
}
