//! Frame Stats Tests
//!
//! Tests for:
//! - Dropped/delayed classification
//! - Ring-buffer capacity
//! - Summary aggregates

use prism::engine::frame_stats::FrameStats;
use prism::engine::{Timestamps, TIME_DROPPED};

const VSYNC: i64 = 16_666_667;

fn frame(latch: i64, render_done: i64, target: i64, actual: i64) -> Timestamps {
    Timestamps {
        latch_point_time: latch,
        update_done_time: latch + 1_000_000,
        render_start_time: latch + 1_000_000,
        render_done_time: render_done,
        target_presentation_time: target,
        actual_presentation_time: actual,
    }
}

fn on_time_frame(target: i64) -> Timestamps {
    frame(target - 8_000_000, target - 2_000_000, target, target)
}

// ============================================================================
// Classification
// ============================================================================

#[test]
fn on_time_frames_are_neither_dropped_nor_delayed() {
    let mut stats = FrameStats::new();
    for i in 1..=10 {
        stats.record_frame(on_time_frame(i * VSYNC), VSYNC);
    }
    assert_eq!(stats.frame_count(), 10);
    assert_eq!(stats.dropped_frame_count(), 0);
    assert_eq!(stats.delayed_frame_count(), 0);
}

#[test]
fn dropped_frames_are_counted() {
    let mut stats = FrameStats::new();
    stats.record_frame(frame(0, 2_000_000, VSYNC, TIME_DROPPED), VSYNC);
    assert_eq!(stats.frame_count(), 1);
    assert_eq!(stats.dropped_frame_count(), 1);
    assert_eq!(stats.delayed_frame_count(), 0);
}

#[test]
fn a_frame_that_missed_a_vsync_is_delayed() {
    let mut stats = FrameStats::new();
    // Presented exactly one interval late.
    stats.record_frame(frame(0, 10_000_000, VSYNC, 2 * VSYNC), VSYNC);
    assert_eq!(stats.delayed_frame_count(), 1);

    // Presented late, but within the same interval: not delayed.
    stats.record_frame(frame(0, 10_000_000, VSYNC, VSYNC + 1_000_000), VSYNC);
    assert_eq!(stats.delayed_frame_count(), 1);
}

// ============================================================================
// Ring capacity
// ============================================================================

#[test]
fn counts_keep_growing_past_ring_capacity() {
    let mut stats = FrameStats::with_capacities(4, 2, 2);
    for i in 1..=20 {
        stats.record_frame(on_time_frame(i * VSYNC), VSYNC);
    }
    assert_eq!(stats.frame_count(), 20);
    // The summary still works over the retained window.
    let summary = stats.summary();
    assert_eq!(summary.total_frame_count, 20);
    assert_eq!(summary.prediction_accuracy_ns, 0);
}

// ============================================================================
// Summary aggregates
// ============================================================================

#[test]
fn summary_reports_prediction_accuracy_and_frame_time() {
    let mut stats = FrameStats::new();
    // Every frame lands 1 ms late, 10 ms after its latch point.
    for i in 1..=10 {
        let target = i * VSYNC;
        stats.record_frame(
            frame(target - 9_000_000, target - 500_000, target, target + 1_000_000),
            VSYNC,
        );
    }
    let summary = stats.summary_at_percentile(100);
    assert_eq!(summary.prediction_accuracy_ns, 1_000_000);
    assert_eq!(summary.total_frame_time_ns, 10_000_000);
    assert_eq!(summary.latency_ns, 1_500_000);
}

#[test]
fn dropped_frames_do_not_poison_the_aggregates() {
    let mut stats = FrameStats::new();
    stats.record_frame(on_time_frame(VSYNC), VSYNC);
    stats.record_frame(frame(0, 2_000_000, 2 * VSYNC, TIME_DROPPED), VSYNC);
    let summary = stats.summary_at_percentile(100);
    assert_eq!(summary.prediction_accuracy_ns, 0);
    assert_eq!(summary.dropped_frame_count, 1);
}

#[test]
fn summary_serializes_for_observability_dumps() {
    let mut stats = FrameStats::new();
    stats.record_frame(on_time_frame(VSYNC), VSYNC);
    let json = serde_json::to_value(stats.summary()).expect("serialize summary");
    assert_eq!(json["total_frame_count"], 1);
    assert_eq!(json["dropped_frame_count"], 0);
}
