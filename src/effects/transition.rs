//! Effect switch transitions
//!
//! A transition wraps the manager's per-tick output: with `Cut` frames pass
//! through untouched, with `Crossfade` the outgoing frame is blended into the
//! incoming effect's frames over a fixed number of ticks.

use serde::{Deserialize, Serialize};

use crate::frame::PixelFrame;

/// How the wall changes when the active effect switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionPolicy {
    #[default]
    Cut,
    Crossfade {
        ticks: u32,
    },
}

/// Transition state for one switch at a time
#[derive(Debug, Clone, Default)]
pub struct Transition {
    policy: TransitionPolicy,
    from: Option<PixelFrame>,
    elapsed: u32,
}

impl Transition {
    pub fn new(policy: TransitionPolicy) -> Self {
        Self {
            policy,
            from: None,
            elapsed: 0,
        }
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Start blending away from `outgoing`
    pub fn begin(&mut self, outgoing: PixelFrame) {
        match self.policy {
            TransitionPolicy::Crossfade { ticks } if ticks > 0 => {
                self.from = Some(outgoing);
                self.elapsed = 0;
            }
            _ => self.from = None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.from.is_some()
    }

    /// Blend this tick's frame
    pub fn apply(&mut self, incoming: PixelFrame) -> PixelFrame {
        let TransitionPolicy::Crossfade { ticks } = self.policy else {
            return incoming;
        };
        let Some(from) = &self.from else {
            return incoming;
        };

        self.elapsed += 1;
        let t = self.elapsed as f32 / ticks.max(1) as f32;
        let blended = from.blend(&incoming, t).unwrap_or_else(|| incoming.clone());
        if self.elapsed >= ticks {
            self.from = None;
            return incoming;
        }
        blended
    }
}
