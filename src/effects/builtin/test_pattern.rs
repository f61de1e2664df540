//! Test Pattern Effect
//!
//! Sweeps a colored column and a white row across the wall over a background
//! color, so every pixel and every color channel can be checked by eye.

use crate::effects::traits::{Effect, EffectContext, EffectDefinition, InputSpec};
use crate::error::EffectError;
use crate::frame::{PixelFrame, Rgbw};
use crate::mapping::EffectInputs;

const SCAN_WHITE: Rgbw = Rgbw::new(255, 255, 255, 0);

/// Test pattern effect definition
pub struct TestPatternDefinition;

impl EffectDefinition for TestPatternDefinition {
    fn effect_type(&self) -> &'static str {
        "test_pattern"
    }

    fn display_name(&self) -> &'static str {
        "Test Pattern"
    }

    fn category(&self) -> &'static str {
        "Diagnostic"
    }

    fn description(&self) -> &'static str {
        "Checks all pixels and colors"
    }

    fn inputs(&self) -> Vec<InputSpec> {
        vec![
            InputSpec::master(),
            InputSpec::color(),
            InputSpec::rgbw("background", "Background", Rgbw::BLACK),
            InputSpec::fraction("speed", "Speed", 0.5),
        ]
    }

    fn create(&self) -> Box<dyn Effect> {
        Box::new(TestPatternRuntime::default())
    }
}

/// Runtime for the test pattern
#[derive(Default)]
pub struct TestPatternRuntime {
    /// Scan position in pixels, advances by `speed` each tick
    position: f32,
}

impl Effect for TestPatternRuntime {
    fn activate(&mut self, _ctx: &EffectContext) -> Result<(), EffectError> {
        self.position = 0.0;
        Ok(())
    }

    fn compute(
        &mut self,
        ctx: &EffectContext,
        inputs: &EffectInputs,
        _previous: &PixelFrame,
    ) -> Result<PixelFrame, EffectError> {
        let master = inputs.fraction("master");
        let color = inputs.color("color").scale(master);
        let background = inputs.color("background").scale(master);

        let cells = (ctx.width * ctx.height).max(1) as f32;
        let step = (self.position + 0.5) as usize;
        self.position = (self.position + inputs.fraction("speed")) % cells;

        let mut frame = PixelFrame::filled(ctx.width, ctx.height, background);
        let column = step % ctx.width.max(1);
        let row = step % ctx.height.max(1);
        for y in 0..ctx.height {
            frame.set(column, y, color);
        }
        for x in 0..ctx.width {
            frame.set(x, row, SCAN_WHITE.scale(master));
        }
        Ok(frame)
    }
}
