//! Afterglow Effect
//!
//! Sparkles of the input color that fade out over following ticks. Each frame
//! starts from the previous one, so this is the effect that depends on
//! continuity between ticks.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::effects::traits::{Effect, EffectContext, EffectDefinition, InputSpec};
use crate::error::EffectError;
use crate::frame::PixelFrame;
use crate::mapping::EffectInputs;

/// Afterglow effect definition
pub struct AfterglowDefinition;

impl EffectDefinition for AfterglowDefinition {
    fn effect_type(&self) -> &'static str {
        "afterglow"
    }

    fn display_name(&self) -> &'static str {
        "Afterglow"
    }

    fn category(&self) -> &'static str {
        "Pattern"
    }

    fn description(&self) -> &'static str {
        "Random sparkles that fade out"
    }

    fn inputs(&self) -> Vec<InputSpec> {
        vec![
            InputSpec::master(),
            InputSpec::color(),
            InputSpec::fraction("decay", "Decay", 0.1),
            InputSpec::fraction("density", "Density", 0.02),
        ]
    }

    fn create(&self) -> Box<dyn Effect> {
        Box::new(AfterglowRuntime::new())
    }
}

/// Runtime for the afterglow effect
pub struct AfterglowRuntime {
    rng: StdRng,
}

impl AfterglowRuntime {
    pub fn new() -> Self {
        Self {
            rng: StdRng::seed_from_u64(0),
        }
    }
}

impl Default for AfterglowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for AfterglowRuntime {
    fn activate(&mut self, ctx: &EffectContext) -> Result<(), EffectError> {
        self.rng = StdRng::seed_from_u64(ctx.tick);
        Ok(())
    }

    fn compute(
        &mut self,
        ctx: &EffectContext,
        inputs: &EffectInputs,
        previous: &PixelFrame,
    ) -> Result<PixelFrame, EffectError> {
        let color = inputs.color("color").scale(inputs.fraction("master"));
        let keep = 1.0 - inputs.fraction("decay");
        let density = inputs.fraction("density");

        let mut frame = if previous.shape() == ctx.shape() {
            previous.clone()
        } else {
            ctx.blank_frame()
        };

        for pixel in frame.pixels_mut() {
            *pixel = if density > 0.0 && self.rng.random::<f32>() < density {
                color
            } else {
                pixel.scale(keep)
            };
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Rgbw;
    use crate::mapping::InputValue;

    fn inputs(decay: f32, density: f32) -> EffectInputs {
        let mut inputs = EffectInputs::new();
        inputs.set("master", InputValue::Fraction(1.0));
        inputs.set("color", InputValue::Rgbw(Rgbw::new(0, 0, 0, 255)));
        inputs.set("decay", InputValue::Fraction(decay));
        inputs.set("density", InputValue::Fraction(density));
        inputs
    }

    #[test]
    fn test_decays_previous_frame() {
        let ctx = EffectContext::new(3, 3);
        let previous = PixelFrame::filled(3, 3, Rgbw::new(200, 100, 50, 0));
        let frame = AfterglowRuntime::new()
            .compute(&ctx, &inputs(0.5, 0.0), &previous)
            .unwrap();
        assert!(frame.pixels().iter().all(|p| *p == Rgbw::new(100, 50, 25, 0)));
    }

    #[test]
    fn test_full_density_paints_color() {
        let ctx = EffectContext::new(3, 3);
        let frame = AfterglowRuntime::new()
            .compute(&ctx, &inputs(0.0, 1.0), &ctx.blank_frame())
            .unwrap();
        assert!(frame.pixels().iter().all(|p| *p == Rgbw::new(0, 0, 0, 255)));
    }

    #[test]
    fn test_mismatched_previous_starts_black() {
        let ctx = EffectContext::new(2, 2);
        let frame = AfterglowRuntime::new()
            .compute(&ctx, &inputs(0.0, 0.0), &PixelFrame::new(5, 5))
            .unwrap();
        assert_eq!(frame.shape(), (2, 2));
    }
}
