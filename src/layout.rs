//! Physical layout
//!
//! Maps logical pixels (row-major, origin top left) onto the wall's wiring:
//! which universe each pixel lands in and at which channel offset. The address
//! table is built once from configuration; a reload rebuilds it.
//!
//! Wiring is described as a sequence of runs. Without `column_major` a run is a
//! row, otherwise a column. `serpentine` flips every second run,
//! `row_reversed` mirrors the wall horizontally and `column_reversed`
//! vertically. Pixels never straddle universes: each universe carries
//! `floor(capacity / 4)` pixels.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::frame::{PixelFrame, Rgbw};
use crate::universe::{PortAddress, UNIVERSE_SIZE};

const CHANNELS_PER_PIXEL: usize = 4;

/// How pixels are packed into universes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Packing {
    /// Pixels fill universes back to back
    #[default]
    Packed,
    /// Every run starts a fresh universe
    RunPerUniverse,
}

/// Byte order of one pixel on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorOrder {
    #[default]
    Rgbw,
    Grbw,
    Rgwb,
    Rwgb,
    Bgrw,
    Bgwr,
    Wbrg,
}

impl ColorOrder {
    /// Source channel (0=R, 1=G, 2=B, 3=W) for each wire position
    fn indices(self) -> [usize; 4] {
        match self {
            ColorOrder::Rgbw => [0, 1, 2, 3],
            ColorOrder::Grbw => [1, 0, 2, 3],
            ColorOrder::Rgwb => [0, 1, 3, 2],
            ColorOrder::Rwgb => [0, 3, 1, 2],
            ColorOrder::Bgrw => [2, 1, 0, 3],
            ColorOrder::Bgwr => [2, 1, 3, 0],
            ColorOrder::Wbrg => [3, 2, 0, 1],
        }
    }

    pub fn encode(self, pixel: Rgbw) -> [u8; 4] {
        let src = pixel.to_array();
        self.indices().map(|i| src[i])
    }

    pub fn decode(self, wire: [u8; 4]) -> Rgbw {
        let mut out = [0u8; 4];
        for (pos, src) in self.indices().into_iter().enumerate() {
            out[src] = wire[pos];
        }
        Rgbw::from_array(out)
    }
}

/// Wiring and universe packing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Usable channels per universe
    pub universe_capacity: usize,
    /// Flat port address of the first universe
    pub start_universe: u16,
    pub column_major: bool,
    pub serpentine: bool,
    pub row_reversed: bool,
    pub column_reversed: bool,
    pub packing: Packing,
    pub color_order: ColorOrder,
    /// Largest allowed share of capacity left unused by the multiple-of-4 rule
    pub max_waste_fraction: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            universe_capacity: UNIVERSE_SIZE,
            start_universe: 1,
            column_major: false,
            serpentine: false,
            row_reversed: false,
            column_reversed: false,
            packing: Packing::Packed,
            color_order: ColorOrder::Rgbw,
            max_waste_fraction: 0.25,
        }
    }
}

/// Where one logical pixel lives on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub universe: PortAddress,
    /// 0-based channel offset of the pixel's first byte
    pub offset: usize,
}

/// Precomputed logical to physical address table
#[derive(Debug, Clone)]
pub struct PhysicalLayout {
    width: usize,
    height: usize,
    config: LayoutConfig,
    /// Indexed by logical row-major pixel index
    slots: Vec<Slot>,
    /// Bytes used in each universe
    lengths: BTreeMap<PortAddress, usize>,
}

impl PhysicalLayout {
    /// Build and validate the address table
    pub fn new(width: usize, height: usize, config: LayoutConfig) -> Result<Self, ConfigError> {
        if width == 0 || height == 0 {
            return Err(ConfigError::EmptyMatrix { width, height });
        }
        let capacity = config.universe_capacity;
        if !(CHANNELS_PER_PIXEL..=UNIVERSE_SIZE).contains(&capacity) {
            return Err(ConfigError::InvalidCapacity(capacity));
        }
        let wasted = capacity % CHANNELS_PER_PIXEL;
        if wasted as f32 / capacity as f32 > config.max_waste_fraction {
            return Err(ConfigError::ExcessiveWaste {
                capacity,
                wasted,
                max_fraction: config.max_waste_fraction,
            });
        }

        let per_universe = capacity / CHANNELS_PER_PIXEL;
        let (runs, run_len) = if config.column_major {
            (width, height)
        } else {
            (height, width)
        };
        if config.packing == Packing::RunPerUniverse && run_len > per_universe {
            return Err(ConfigError::RunTooLong {
                run: run_len,
                per_universe,
            });
        }

        let mut slots = vec![
            Slot {
                universe: PortAddress::default(),
                offset: 0,
            };
            width * height
        ];
        let mut lengths = BTreeMap::new();

        for run in 0..runs {
            for step in 0..run_len {
                let along = if config.serpentine && run % 2 == 1 {
                    run_len - 1 - step
                } else {
                    step
                };
                let (mut x, mut y) = if config.column_major {
                    (run, along)
                } else {
                    (along, run)
                };
                if config.row_reversed {
                    x = width - 1 - x;
                }
                if config.column_reversed {
                    y = height - 1 - y;
                }

                let physical = run * run_len + step;
                let (universe_index, pixel_in_universe) = match config.packing {
                    Packing::Packed => (physical / per_universe, physical % per_universe),
                    Packing::RunPerUniverse => (run, step),
                };

                let flat = config.start_universe as u32 + universe_index as u32;
                if flat > PortAddress::MAX as u32 {
                    return Err(ConfigError::PortAddressOverflow(flat));
                }
                let universe = PortAddress::from_u16(flat as u16);
                let offset = pixel_in_universe * CHANNELS_PER_PIXEL;

                slots[y * width + x] = Slot { universe, offset };
                let used = lengths.entry(universe).or_insert(0usize);
                *used = (*used).max(offset + CHANNELS_PER_PIXEL);
            }
        }

        tracing::debug!(
            width,
            height,
            universes = lengths.len(),
            per_universe,
            "Physical layout built"
        );

        Ok(Self {
            width,
            height,
            config,
            slots,
            lengths,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Number of universes the wall occupies
    pub fn universe_count(&self) -> usize {
        self.lengths.len()
    }

    /// Universes with the number of channels used in each
    pub fn universes(&self) -> impl Iterator<Item = (PortAddress, usize)> + '_ {
        self.lengths.iter().map(|(u, len)| (*u, *len))
    }

    /// Slot of a logical pixel
    pub fn slot(&self, x: usize, y: usize) -> Option<Slot> {
        (x < self.width && y < self.height).then(|| self.slots[y * self.width + x])
    }

    /// Split a frame into universe payloads
    ///
    /// A frame of a different shape yields all-zero payloads.
    pub fn pack(&self, frame: &PixelFrame) -> BTreeMap<PortAddress, Vec<u8>> {
        let mut out: BTreeMap<PortAddress, Vec<u8>> = self
            .lengths
            .iter()
            .map(|(u, len)| (*u, vec![0u8; *len]))
            .collect();
        if frame.shape() != self.shape() {
            tracing::warn!(
                expected = ?self.shape(),
                found = ?frame.shape(),
                "Refusing to pack frame of wrong shape"
            );
            return out;
        }

        let order = self.config.color_order;
        for (pixel, slot) in frame.pixels().iter().zip(&self.slots) {
            if let Some(payload) = out.get_mut(&slot.universe) {
                payload[slot.offset..slot.offset + CHANNELS_PER_PIXEL].copy_from_slice(&order.encode(*pixel));
            }
        }
        out
    }

    /// Rebuild a frame from universe payloads; missing bytes read as zero
    pub fn unpack(&self, universes: &BTreeMap<PortAddress, Vec<u8>>) -> PixelFrame {
        let order = self.config.color_order;
        let pixels = self
            .slots
            .iter()
            .map(|slot| {
                let payload = universes.get(&slot.universe);
                let byte = |i: usize| {
                    payload
                        .and_then(|p| p.get(slot.offset + i))
                        .copied()
                        .unwrap_or(0)
                };
                order.decode([byte(0), byte(1), byte(2), byte(3)])
            })
            .collect();
        PixelFrame::from_pixels(self.width, self.height, pixels)
            .unwrap_or_else(|| PixelFrame::new(self.width, self.height))
    }
}
