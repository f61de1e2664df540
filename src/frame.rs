//! Pixel frames
//!
//! A frame is a row-major grid of RGBW cells with a shape that stays fixed for
//! the whole session.

use serde::{Deserialize, Serialize};

/// Reference white used when folding the W channel into RGB for previews.
const WARM_WHITE: [u16; 3] = [255, 209, 163];

/// One RGBW pixel
#[repr(C)]
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, bytemuck::Pod, bytemuck::Zeroable,
)]
pub struct Rgbw {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub w: u8,
}

impl Rgbw {
    pub const BLACK: Rgbw = Rgbw::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, w: u8) -> Self {
        Self { r, g, b, w }
    }

    pub fn from_array(c: [u8; 4]) -> Self {
        Self::new(c[0], c[1], c[2], c[3])
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.w]
    }

    /// Scale every channel by `factor` (clamped to 0.0..=1.0)
    pub fn scale(self, factor: f32) -> Self {
        let f = factor.clamp(0.0, 1.0);
        let s = |c: u8| (c as f32 * f).round() as u8;
        Self::new(s(self.r), s(self.g), s(self.b), s(self.w))
    }

    /// Linear blend, `t = 0` is `self`, `t = 1` is `other`
    pub fn lerp(self, other: Rgbw, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round().clamp(0.0, 255.0) as u8;
        Self::new(
            mix(self.r, other.r),
            mix(self.g, other.g),
            mix(self.b, other.b),
            mix(self.w, other.w),
        )
    }

    /// Approximate RGB of this pixel as seen by the eye
    pub fn to_rgb(self) -> [u8; 3] {
        let fold = |c: u8, white: u16| -> u8 {
            let v = c as u16 + (self.w as u16 * white) / 255;
            v.min(255) as u8
        };
        [
            fold(self.r, WARM_WHITE[0]),
            fold(self.g, WARM_WHITE[1]),
            fold(self.b, WARM_WHITE[2]),
        ]
    }
}

/// Width x height grid of RGBW pixels
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelFrame {
    width: usize,
    height: usize,
    pixels: Vec<Rgbw>,
}

impl PixelFrame {
    /// Create an all-black frame
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, Rgbw::BLACK)
    }

    /// Create a frame with every pixel set to `color`
    pub fn filled(width: usize, height: usize, color: Rgbw) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width * height],
        }
    }

    /// Build a frame from a row-major pixel vector
    ///
    /// Returns `None` if the vector length does not match the shape.
    pub fn from_pixels(width: usize, height: usize, pixels: Vec<Rgbw>) -> Option<Self> {
        (pixels.len() == width * height).then_some(Self { width, height, pixels })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// (width, height)
    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn get(&self, x: usize, y: usize) -> Option<Rgbw> {
        if x < self.width && y < self.height {
            Some(self.pixels[y * self.width + x])
        } else {
            None
        }
    }

    /// Set a pixel; out-of-range coordinates are ignored
    pub fn set(&mut self, x: usize, y: usize, color: Rgbw) {
        if x < self.width && y < self.height {
            self.pixels[y * self.width + x] = color;
        }
    }

    pub fn fill(&mut self, color: Rgbw) {
        self.pixels.fill(color);
    }

    pub fn pixels(&self) -> &[Rgbw] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [Rgbw] {
        &mut self.pixels
    }

    /// Raw RGBW bytes in row-major order
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    /// Blend towards `other` by `t`; shapes must match
    pub fn blend(&self, other: &PixelFrame, t: f32) -> Option<PixelFrame> {
        if self.shape() != other.shape() {
            return None;
        }
        let pixels = self
            .pixels
            .iter()
            .zip(&other.pixels)
            .map(|(a, b)| a.lerp(*b, t))
            .collect();
        Some(PixelFrame {
            width: self.width,
            height: self.height,
            pixels,
        })
    }

    /// Row-major RGB rows for the preview UI
    pub fn to_rgb_preview(&self) -> Vec<Vec<[u8; 3]>> {
        self.pixels
            .chunks(self.width.max(1))
            .map(|row| row.iter().map(|p| p.to_rgb()).collect())
            .collect()
    }
}
