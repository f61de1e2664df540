//! Color Mix Effect
//!
//! Blends two colors through a static noise pattern. The pattern is generated
//! from a seeded RNG so the same inputs always give the same picture, and it is
//! only regenerated when the pattern type or scale changes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::effects::traits::{Effect, EffectContext, EffectDefinition, InputSpec};
use crate::error::EffectError;
use crate::frame::{PixelFrame, Rgbw};
use crate::mapping::EffectInputs;

/// Noise pattern families, selected by the `pattern` input in quarters of its range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoisePattern {
    /// Random blocks, nearest-neighbour upscaled
    Blocks,
    /// Bilinear upscaled value noise
    Smooth,
    /// Constant along each row
    HorizontalStripes,
    /// Constant along each column
    VerticalStripes,
}

impl NoisePattern {
    pub fn from_byte(value: u8) -> Self {
        match value / 64 {
            0 => NoisePattern::Blocks,
            1 => NoisePattern::Smooth,
            2 => NoisePattern::HorizontalStripes,
            _ => NoisePattern::VerticalStripes,
        }
    }

    fn seed_index(self) -> u64 {
        match self {
            NoisePattern::Blocks => 0,
            NoisePattern::Smooth => 1,
            NoisePattern::HorizontalStripes => 2,
            NoisePattern::VerticalStripes => 3,
        }
    }
}

/// Color mix effect definition
pub struct ColorMixDefinition;

impl EffectDefinition for ColorMixDefinition {
    fn effect_type(&self) -> &'static str {
        "color_mix"
    }

    fn display_name(&self) -> &'static str {
        "Color Mix"
    }

    fn category(&self) -> &'static str {
        "Color"
    }

    fn description(&self) -> &'static str {
        "Blends two colors using selectable noise patterns"
    }

    fn inputs(&self) -> Vec<InputSpec> {
        vec![
            InputSpec::master(),
            InputSpec::color(),
            InputSpec::rgbw("color2", "Second Color", Rgbw::new(255, 255, 255, 255)),
            InputSpec::fraction("blend", "Blend", 127.0 / 255.0),
            InputSpec::byte("noise_scale", "Noise Scale", 127),
            InputSpec::byte("pattern", "Pattern", 64),
        ]
    }

    fn create(&self) -> Box<dyn Effect> {
        Box::new(ColorMixRuntime::default())
    }
}

/// Runtime for the color mix effect
#[derive(Default)]
pub struct ColorMixRuntime {
    /// Cached pattern and the (pattern, scale, shape) it was built for
    noise: Option<(NoisePattern, u8, (usize, usize), Vec<f32>)>,
}

impl ColorMixRuntime {
    fn noise(&mut self, pattern: NoisePattern, scale: u8, ctx: &EffectContext) -> &[f32] {
        let shape = ctx.shape();
        let stale = !matches!(
            &self.noise,
            Some((p, s, sh, _)) if *p == pattern && *s == scale && *sh == shape
        );
        if stale {
            let values = generate_noise(pattern, scale, ctx.width, ctx.height);
            self.noise = Some((pattern, scale, shape, values));
        }
        match &self.noise {
            Some((_, _, _, values)) => values,
            None => &[],
        }
    }
}

impl Effect for ColorMixRuntime {
    fn activate(&mut self, _ctx: &EffectContext) -> Result<(), EffectError> {
        self.noise = None;
        Ok(())
    }

    fn compute(
        &mut self,
        ctx: &EffectContext,
        inputs: &EffectInputs,
        _previous: &PixelFrame,
    ) -> Result<PixelFrame, EffectError> {
        let master = inputs.fraction("master");
        let c1 = inputs.color("color").scale(master);
        let c2 = inputs.color("color2").scale(master);
        let offset = inputs.fraction("blend") * 2.0 - 1.0;
        let pattern = NoisePattern::from_byte(inputs.byte("pattern"));
        let scale = inputs.byte("noise_scale");

        let noise = self.noise(pattern, scale, ctx);
        let pixels = noise
            .iter()
            .map(|n| c1.lerp(c2, (n + offset).clamp(0.0, 1.0)))
            .collect();

        PixelFrame::from_pixels(ctx.width, ctx.height, pixels)
            .ok_or_else(|| EffectError::Compute("noise pattern size mismatch".into()))
    }
}

/// Row-major noise in 0.0..=1.0
fn generate_noise(pattern: NoisePattern, scale: u8, width: usize, height: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(pattern.seed_index() * 1000 + scale as u64);

    // 0 gives coarse blocks, 255 a grid as fine as the wall
    let min_grid = 2usize;
    let max_grid = width.max(height).max(min_grid);
    let grid = (min_grid as f32 + (scale as f32 / 255.0) * (max_grid - min_grid) as f32) as usize;
    let grid = grid.max(min_grid);

    let (gw, gh) = match pattern {
        NoisePattern::Blocks | NoisePattern::Smooth => (grid, grid),
        NoisePattern::HorizontalStripes => (1, grid),
        NoisePattern::VerticalStripes => (grid, 1),
    };
    let cells: Vec<f32> = (0..gw * gh).map(|_| rng.random::<f32>()).collect();

    let mut out = Vec::with_capacity(width * height);
    for y in 0..height {
        let sy = source_coord(y, height, gh);
        for x in 0..width {
            let sx = source_coord(x, width, gw);
            let v = match pattern {
                NoisePattern::Blocks => {
                    let cx = (sx.round() as usize).min(gw - 1);
                    let cy = (sy.round() as usize).min(gh - 1);
                    cells[cy * gw + cx]
                }
                _ => bilinear(&cells, gw, gh, sx, sy),
            };
            out.push(v);
        }
    }
    out
}

/// Map a destination index onto a source grid of `src` cells (pixel centers aligned)
fn source_coord(dst: usize, dst_len: usize, src: usize) -> f32 {
    let scale = src as f32 / dst_len.max(1) as f32;
    ((dst as f32 + 0.5) * scale - 0.5).clamp(0.0, (src - 1) as f32)
}

fn bilinear(cells: &[f32], w: usize, h: usize, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let top = cells[y0 * w + x0] * (1.0 - fx) + cells[y0 * w + x1] * fx;
    let bottom = cells[y1 * w + x0] * (1.0 - fx) + cells[y1 * w + x1] * fx;
    top * (1.0 - fy) + bottom * fy
}
