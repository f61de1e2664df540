//! Effect traits
//!
//! - `EffectDefinition` - Factory trait: metadata, declared inputs, instances
//! - `Effect` - A live effect instance with lifecycle hooks and `compute`

use serde::Serialize;

use crate::error::EffectError;
use crate::frame::{PixelFrame, Rgbw};
use crate::mapping::{DecodeRule, EffectInputs, InputValue};

/// Per-tick context passed to effects
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectContext {
    pub width: usize,
    pub height: usize,
    /// Seconds since the effect was activated
    pub time: f32,
    /// Seconds since the previous tick
    pub delta_time: f32,
    /// Pipeline tick index
    pub tick: u64,
}

impl EffectContext {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            time: 0.0,
            delta_time: 0.0,
            tick: 0,
        }
    }

    /// (width, height)
    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Black frame of the configured shape
    pub fn blank_frame(&self) -> PixelFrame {
        PixelFrame::new(self.width, self.height)
    }
}

/// One declared effect input
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InputSpec {
    /// Identifier used in mappings (e.g. "master")
    pub name: &'static str,
    /// Human-readable label
    pub label: &'static str,
    pub rule: DecodeRule,
    /// Value used while the input is unmapped
    pub default: InputValue,
}

impl InputSpec {
    pub const fn fraction(name: &'static str, label: &'static str, default: f32) -> Self {
        Self {
            name,
            label,
            rule: DecodeRule::Fraction,
            default: InputValue::Fraction(default),
        }
    }

    pub const fn byte(name: &'static str, label: &'static str, default: u8) -> Self {
        Self {
            name,
            label,
            rule: DecodeRule::Byte,
            default: InputValue::Byte(default),
        }
    }

    pub const fn rgb(name: &'static str, label: &'static str, default: [u8; 3]) -> Self {
        Self {
            name,
            label,
            rule: DecodeRule::Rgb,
            default: InputValue::Rgb(default),
        }
    }

    pub const fn rgbw(name: &'static str, label: &'static str, default: Rgbw) -> Self {
        Self {
            name,
            label,
            rule: DecodeRule::Rgbw,
            default: InputValue::Rgbw(default),
        }
    }

    /// Master dimmer shared by most effects (default full)
    pub const fn master() -> Self {
        Self::fraction("master", "Master", 1.0)
    }

    /// Primary color shared by most effects (default white channel)
    pub const fn color() -> Self {
        Self::rgbw("color", "Color", Rgbw::new(0, 0, 0, 255))
    }
}

/// Trait for effect definitions (factory pattern)
///
/// Each effect type implements this trait to provide metadata and create
/// instances. Definitions are registered with the `EffectRegistry` at startup.
pub trait EffectDefinition: Send + Sync {
    /// Unique identifier (e.g. "single_color")
    fn effect_type(&self) -> &'static str;

    /// Human-readable display name (e.g. "Single Color")
    fn display_name(&self) -> &'static str;

    /// Category for UI grouping (e.g. "Color", "Pattern", "Diagnostic")
    fn category(&self) -> &'static str;

    fn description(&self) -> &'static str {
        ""
    }

    /// Declared inputs in patch order
    fn inputs(&self) -> Vec<InputSpec>;

    /// Create a fresh, inactive instance
    fn create(&self) -> Box<dyn Effect>;
}

/// A live effect instance
///
/// The runtime guarantees `activate` runs exactly once before the first
/// `compute` of each activation, and `deactivate` once when it is torn down.
pub trait Effect: Send {
    fn activate(&mut self, _ctx: &EffectContext) -> Result<(), EffectError> {
        Ok(())
    }

    /// Render one frame of exactly `ctx.shape()`
    ///
    /// `previous` is the last frame this effect produced (or the frame on the
    /// wall when it was activated).
    fn compute(
        &mut self,
        ctx: &EffectContext,
        inputs: &EffectInputs,
        previous: &PixelFrame,
    ) -> Result<PixelFrame, EffectError>;

    fn deactivate(&mut self) -> Result<(), EffectError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_spec_constructors() {
        let master = InputSpec::master();
        assert_eq!(master.rule, DecodeRule::Fraction);
        assert_eq!(master.default, InputValue::Fraction(1.0));

        let color = InputSpec::color();
        assert_eq!(color.rule.width(), 4);
    }

    #[test]
    fn test_context_blank_frame() {
        let ctx = EffectContext::new(5, 3);
        assert_eq!(ctx.blank_frame().shape(), (5, 3));
    }
}
