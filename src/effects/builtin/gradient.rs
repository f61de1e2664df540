//! Gradient Effect
//!
//! Transition between two colors along a direction. `start` moves the center
//! of the transition, `strength` sharpens it (quadratic response) and
//! `direction` rotates it through a full turn.

use std::f32::consts::TAU;

use crate::effects::traits::{Effect, EffectContext, EffectDefinition, InputSpec};
use crate::error::EffectError;
use crate::frame::{PixelFrame, Rgbw};
use crate::mapping::EffectInputs;

/// Gradient effect definition
pub struct GradientDefinition;

impl EffectDefinition for GradientDefinition {
    fn effect_type(&self) -> &'static str {
        "gradient"
    }

    fn display_name(&self) -> &'static str {
        "Gradient"
    }

    fn category(&self) -> &'static str {
        "Color"
    }

    fn description(&self) -> &'static str {
        "Transition between two colors with start, strength and direction"
    }

    fn inputs(&self) -> Vec<InputSpec> {
        vec![
            InputSpec::master(),
            InputSpec::color(),
            InputSpec::rgbw("color2", "Second Color", Rgbw::new(255, 255, 255, 255)),
            InputSpec::fraction("start", "Start", 127.0 / 255.0),
            InputSpec::fraction("strength", "Strength", 0.0),
            InputSpec::fraction("direction", "Direction", 0.0),
        ]
    }

    fn create(&self) -> Box<dyn Effect> {
        Box::new(GradientRuntime)
    }
}

/// Runtime for the gradient effect
pub struct GradientRuntime;

/// Evenly spaced coordinate in -0.5..=0.5
fn centered(i: usize, n: usize) -> f32 {
    if n <= 1 {
        -0.5
    } else {
        i as f32 / (n - 1) as f32 - 0.5
    }
}

impl Effect for GradientRuntime {
    fn compute(
        &mut self,
        ctx: &EffectContext,
        inputs: &EffectInputs,
        _previous: &PixelFrame,
    ) -> Result<PixelFrame, EffectError> {
        let master = inputs.fraction("master");
        let c1 = inputs.color("color").scale(master);
        let c2 = inputs.color("color2").scale(master);

        let start = inputs.fraction("start");
        let strength = inputs.fraction("strength").powi(2);
        let angle = inputs.fraction("direction") * TAU;
        let (dy, dx) = angle.sin_cos();

        let max_res = ctx.width.max(ctx.height) as f32;
        let slope = 0.5 + strength * (max_res - 0.5);

        let mut frame = ctx.blank_frame();
        for y in 0..ctx.height {
            let py = centered(y, ctx.height);
            for x in 0..ctx.width {
                let p = centered(x, ctx.width) * dx + py * dy;
                let t = ((p - (start - 0.5)) * slope + 0.5).clamp(0.0, 1.0);
                frame.set(x, y, c1.lerp(c2, t));
            }
        }
        Ok(frame)
    }
}
