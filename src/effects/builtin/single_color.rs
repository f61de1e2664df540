//! Single Color Effect
//!
//! Fills the wall with one color scaled by the master fader.

use crate::effects::traits::{Effect, EffectContext, EffectDefinition, InputSpec};
use crate::error::EffectError;
use crate::frame::PixelFrame;
use crate::mapping::EffectInputs;

/// Single color effect definition
pub struct SingleColorDefinition;

impl EffectDefinition for SingleColorDefinition {
    fn effect_type(&self) -> &'static str {
        "single_color"
    }

    fn display_name(&self) -> &'static str {
        "Single Color"
    }

    fn category(&self) -> &'static str {
        "Color"
    }

    fn description(&self) -> &'static str {
        "Displays a single color"
    }

    fn inputs(&self) -> Vec<InputSpec> {
        vec![InputSpec::master(), InputSpec::color()]
    }

    fn create(&self) -> Box<dyn Effect> {
        Box::new(SingleColorRuntime)
    }
}

/// Runtime for the single color effect
pub struct SingleColorRuntime;

impl Effect for SingleColorRuntime {
    fn compute(
        &mut self,
        ctx: &EffectContext,
        inputs: &EffectInputs,
        _previous: &PixelFrame,
    ) -> Result<PixelFrame, EffectError> {
        let color = inputs.color("color").scale(inputs.fraction("master"));
        Ok(PixelFrame::filled(ctx.width, ctx.height, color))
    }
}
