//! Pipeline metrics and frame timing
//!
//! Provides tick timing statistics and the pipeline's event counters.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Timing statistics over a rolling window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameStats {
    /// Average duration in milliseconds
    pub avg_ms: f64,
    /// Minimum duration in milliseconds
    pub min_ms: f64,
    /// Maximum duration in milliseconds
    pub max_ms: f64,
    /// 50th percentile (median)
    pub p50_ms: f64,
    /// 95th percentile
    pub p95_ms: f64,
    /// 99th percentile
    pub p99_ms: f64,
    /// Number of samples in the statistics
    pub sample_count: usize,
}

/// Rolling timing profiler
///
/// Tracks the interval between `begin_frame` calls for tick rate, and
/// explicitly recorded durations (compute time) through `record`.
pub struct FrameProfiler {
    /// Recorded durations
    frame_times: VecDeque<Duration>,
    /// Maximum samples to keep
    max_samples: usize,
    /// Last frame start time
    last_frame_start: Option<Instant>,
    /// Frame start times for FPS calculation
    frame_starts: VecDeque<Instant>,
}

impl Default for FrameProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameProfiler {
    pub fn new() -> Self {
        Self::with_capacity(300)
    }

    pub fn with_capacity(max_samples: usize) -> Self {
        let max_samples = max_samples.max(2);
        Self {
            frame_times: VecDeque::with_capacity(max_samples),
            max_samples,
            last_frame_start: None,
            frame_starts: VecDeque::with_capacity(max_samples),
        }
    }

    /// Mark the beginning of a tick
    ///
    /// The interval since the previous call is recorded as a sample.
    pub fn begin_frame(&mut self) {
        self.begin_frame_at(Instant::now());
    }

    fn begin_frame_at(&mut self, now: Instant) {
        if let Some(start) = self.last_frame_start {
            self.record(now.duration_since(start));
        }
        self.last_frame_start = Some(now);

        self.frame_starts.push_back(now);
        if self.frame_starts.len() > self.max_samples {
            self.frame_starts.pop_front();
        }
    }

    /// Record a duration sample directly
    pub fn record(&mut self, duration: Duration) {
        self.frame_times.push_back(duration);
        if self.frame_times.len() > self.max_samples {
            self.frame_times.pop_front();
        }
    }

    pub fn stats(&self) -> FrameStats {
        if self.frame_times.is_empty() {
            return FrameStats::default();
        }

        let mut times: Vec<f64> = self
            .frame_times
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let sum: f64 = times.iter().sum();
        let count = times.len() as f64;

        FrameStats {
            avg_ms: sum / count,
            min_ms: times.first().copied().unwrap_or(0.0),
            max_ms: times.last().copied().unwrap_or(0.0),
            p50_ms: percentile(&times, 0.50),
            p95_ms: percentile(&times, 0.95),
            p99_ms: percentile(&times, 0.99),
            sample_count: times.len(),
        }
    }

    /// Current tick rate from frame start times
    pub fn fps(&self) -> f64 {
        let (Some(first), Some(last)) = (self.frame_starts.front(), self.frame_starts.back()) else {
            return 0.0;
        };
        if self.frame_starts.len() < 2 {
            return 0.0;
        }
        let duration = last.duration_since(*first).as_secs_f64();

        if duration > 0.0 {
            (self.frame_starts.len() - 1) as f64 / duration
        } else {
            0.0
        }
    }

    pub fn last_frame_time_ms(&self) -> f64 {
        self.frame_times
            .back()
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }
}

/// Calculate percentile from sorted array
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p) as usize;
    sorted[idx]
}

/// Pipeline event counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub ticks: u64,
    /// Frames transmitted in full
    pub frames_sent: u64,
    /// Ticks that re-sent the previous frame
    pub frames_reused: u64,
    /// Ticks where compute missed budget + grace
    pub compute_timeouts: u64,
    /// Deadlines skipped because the loop fell behind
    pub ticks_skipped: u64,
    pub send_failures: u64,
    pub packets_received: u64,
    pub protocol_errors: u64,
    pub updates_dropped: u64,
    pub stale_packets: u64,
    pub effect_faults: u64,
}

/// Combined metrics published with each snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineMetrics {
    /// Interval between ticks
    pub tick_stats: FrameStats,
    /// Effect compute time
    pub compute_stats: FrameStats,
    pub fps: f64,
    pub target_fps: u32,
    pub counters: PipelineStats,
}
