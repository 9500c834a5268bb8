//! Frame statistics rings and summary aggregates.

use std::collections::VecDeque;

use serde::Serialize;

use crate::dispatch::Nanos;

use super::frame_timings::{Timestamps, TIME_DROPPED};

/// Default capacity of the recent-frames ring.
pub const NUM_FRAMES_TO_REPORT: usize = 200;
/// Default capacity of the dropped-frames ring.
pub const NUM_DROPPED_FRAMES_TO_REPORT: usize = 50;
/// Default capacity of the delayed-frames ring.
pub const NUM_DELAYED_FRAMES_TO_REPORT: usize = 50;

/// Serializable snapshot of the aggregate statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameStatsSummary {
    /// Total frames recorded since startup.
    pub total_frame_count: u64,
    /// Frames that never reached the screen.
    pub dropped_frame_count: u64,
    /// Frames that missed at least one vsync.
    pub delayed_frame_count: u64,
    /// Trimmed-average of `actual - target` over recent frames, ns.
    pub prediction_accuracy_ns: Nanos,
    /// Trimmed-average of `actual - latch` over recent frames, ns.
    pub total_frame_time_ns: Nanos,
    /// Trimmed-average of `actual - render done` over recent frames, ns.
    pub latency_ns: Nanos,
    /// Trimmed-average of `actual - target` over delayed frames, ns.
    pub delayed_prediction_accuracy_ns: Nanos,
    /// Trimmed-average of `actual - latch` over delayed frames, ns.
    pub delayed_total_frame_time_ns: Nanos,
}

/// Ring buffers of recent, dropped, and delayed frame timestamps, plus
/// percentile aggregates for observability.
///
/// A frame is **delayed** iff `actual - vsync_interval >= target`: it
/// missed at least one vsync and presented later than intended.
pub struct FrameStats {
    frame_count: u64,
    dropped_frame_count: u64,
    delayed_frame_count: u64,
    frame_times: VecDeque<Timestamps>,
    dropped_frames: VecDeque<Timestamps>,
    delayed_frames: VecDeque<Timestamps>,
    frame_times_cap: usize,
    dropped_cap: usize,
    delayed_cap: usize,
}

impl FrameStats {
    /// Creates stats rings with the default capacities.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacities(
            NUM_FRAMES_TO_REPORT,
            NUM_DROPPED_FRAMES_TO_REPORT,
            NUM_DELAYED_FRAMES_TO_REPORT,
        )
    }

    /// Creates stats rings with explicit capacities.
    #[must_use]
    pub fn with_capacities(frame_times: usize, dropped: usize, delayed: usize) -> Self {
        Self {
            frame_count: 0,
            dropped_frame_count: 0,
            delayed_frame_count: 0,
            frame_times: VecDeque::with_capacity(frame_times),
            dropped_frames: VecDeque::with_capacity(dropped),
            delayed_frames: VecDeque::with_capacity(delayed),
            frame_times_cap: frame_times,
            dropped_cap: dropped,
            delayed_cap: delayed,
        }
    }

    /// Records a finalized frame.
    pub fn record_frame(&mut self, timestamps: Timestamps, display_vsync_interval: Nanos) {
        self.frame_count += 1;

        if timestamps.actual_presentation_time == TIME_DROPPED {
            self.dropped_frame_count += 1;
            push_capped(&mut self.dropped_frames, timestamps, self.dropped_cap);
        } else if timestamps.actual_presentation_time - display_vsync_interval
            >= timestamps.target_presentation_time
        {
            self.delayed_frame_count += 1;
            push_capped(&mut self.delayed_frames, timestamps, self.delayed_cap);
        }

        push_capped(&mut self.frame_times, timestamps, self.frame_times_cap);
    }

    /// Total frames recorded.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frames recorded as dropped.
    #[must_use]
    pub fn dropped_frame_count(&self) -> u64 {
        self.dropped_frame_count
    }

    /// Frames recorded as delayed.
    #[must_use]
    pub fn delayed_frame_count(&self) -> u64 {
        self.delayed_frame_count
    }

    /// Builds the p95 summary snapshot.
    #[must_use]
    pub fn summary(&self) -> FrameStatsSummary {
        self.summary_at_percentile(95)
    }

    /// Builds a summary at an arbitrary percentile.
    #[must_use]
    pub fn summary_at_percentile(&self, percentile: u32) -> FrameStatsSummary {
        let prediction = |t: &Timestamps| t.actual_presentation_time - t.target_presentation_time;
        let total = |t: &Timestamps| t.actual_presentation_time - t.latch_point_time;
        let latency = |t: &Timestamps| t.actual_presentation_time - t.render_done_time;

        FrameStatsSummary {
            total_frame_count: self.frame_count,
            dropped_frame_count: self.dropped_frame_count,
            delayed_frame_count: self.delayed_frame_count,
            prediction_accuracy_ns: average_duration(&self.frame_times, prediction, percentile),
            total_frame_time_ns: average_duration(&self.frame_times, total, percentile),
            latency_ns: average_duration(&self.frame_times, latency, percentile),
            delayed_prediction_accuracy_ns: average_duration(
                &self.delayed_frames,
                prediction,
                percentile,
            ),
            delayed_total_frame_time_ns: average_duration(&self.delayed_frames, total, percentile),
        }
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

fn push_capped(ring: &mut VecDeque<Timestamps>, timestamps: Timestamps, cap: usize) {
    ring.push_front(timestamps);
    if ring.len() > cap {
        let _ = ring.pop_back();
    }
}

// Average of the durations at or above the requested percentile: sort
// descending, trim the smallest (100 - percentile) percent, average the
// rest. Dropped frames carry sentinel times and are excluded.
fn average_duration(
    timestamps: &VecDeque<Timestamps>,
    duration_of: impl Fn(&Timestamps) -> Nanos,
    percentile: u32,
) -> Nanos {
    debug_assert!(percentile <= 100);

    let mut durations: Vec<Nanos> = timestamps
        .iter()
        .filter(|t| t.actual_presentation_time != TIME_DROPPED)
        .map(duration_of)
        .collect();
    durations.sort_unstable_by(|a, b| b.cmp(a));

    let trim = ((durations.len() as f64) * f64::from(100 - percentile) / 100.0).ceil() as usize;
    durations.truncate(durations.len().saturating_sub(trim));

    if durations.is_empty() {
        return 0;
    }
    let total: i128 = durations.iter().map(|d| i128::from(*d)).sum();
    (total / durations.len() as i128) as Nanos
}
