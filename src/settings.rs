//! Compositor Settings
//!
//! Tunable parameters for the frame pipeline. Defaults match a 60 Hz
//! display with a triple-buffered swapchain.
//!
//! # Example
//!
//! ```rust
//! use prism::settings::CompositorSettings;
//!
//! let settings = CompositorSettings {
//!     swapchain_image_count: 2, // accept the tearing trade-off
//!     ..Default::default()
//! };
//! assert!(settings.required_render_time > 0);
//! ```

use serde::{Deserialize, Serialize};

use crate::dispatch::{Nanos, MILLISECOND};
use crate::engine::frame_stats;
use crate::swapchain::DEFAULT_SWAPCHAIN_IMAGE_COUNT;

/// Configuration for the frame pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorSettings {
    /// Number of framebuffers in the swapchain ring. Three avoids
    /// tearing when a frame slips a vsync; two trades that risk for one
    /// frame less latency. Must be at least 2.
    pub swapchain_image_count: usize,

    /// Predicted time needed to render a frame, in nanoseconds. The
    /// scheduler wakes up this long before each target vsync.
    pub required_render_time: Nanos,

    /// Capacity of the recent-frames statistics ring.
    pub stats_recent_frame_count: usize,

    /// Capacity of the dropped-frames statistics ring.
    pub stats_dropped_frame_count: usize,

    /// Capacity of the delayed-frames statistics ring.
    pub stats_delayed_frame_count: usize,
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self {
            swapchain_image_count: DEFAULT_SWAPCHAIN_IMAGE_COUNT,
            required_render_time: 8 * MILLISECOND,
            stats_recent_frame_count: frame_stats::NUM_FRAMES_TO_REPORT,
            stats_dropped_frame_count: frame_stats::NUM_DROPPED_FRAMES_TO_REPORT,
            stats_delayed_frame_count: frame_stats::NUM_DELAYED_FRAMES_TO_REPORT,
        }
    }
}
