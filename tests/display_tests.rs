//! Display Tests
//!
//! Tests for:
//! - Vsync-interval estimation and the implausibility cap
//! - Last-vsync extrapolation
//! - Claim/unclaim mutual exclusion
//! - Default-display arrival, ownership changes, display loss

use prism::display::{Display, DisplayInfo, PixelFormat, MAXIMUM_VSYNC_INTERVAL, VSYNC_INTERVAL_60HZ};
use prism::errors::PrismError;

mod common;
use common::new_display_manager;

fn test_display() -> Display {
    Display::new(1, 1024, 600, vec![PixelFormat::Argb8888])
}

// ============================================================================
// Vsync timing
// ============================================================================

#[test]
fn interval_defaults_to_sixty_hertz() {
    let display = test_display();
    assert_eq!(display.vsync_interval(), VSYNC_INTERVAL_60HZ);
    assert_eq!(display.last_vsync_time(), 0);
}

#[test]
fn observed_deltas_refine_the_interval() {
    let display = test_display();
    display.on_vsync(1_000_000);
    display.on_vsync(1_000_000 + 8_333_333); // 120 Hz panel
    assert_eq!(display.vsync_interval(), 8_333_333);
    assert_eq!(display.last_vsync_time(), 9_333_333);
}

#[test]
fn implausible_deltas_are_ignored() {
    let display = test_display();
    display.on_vsync(1_000_000);
    // Driver hiccup: far beyond any believable refresh period.
    display.on_vsync(1_000_000 + MAXIMUM_VSYNC_INTERVAL + 1);
    assert_eq!(display.vsync_interval(), VSYNC_INTERVAL_60HZ);
    // The timestamp itself is still recorded.
    assert_eq!(
        display.last_vsync_time(),
        1_000_000 + MAXIMUM_VSYNC_INTERVAL + 1
    );
}

#[test]
fn extrapolation_steps_in_whole_intervals() {
    let display = test_display();
    display.on_vsync(VSYNC_INTERVAL_60HZ);
    let now = 5 * VSYNC_INTERVAL_60HZ + 123;
    let extrapolated = display.extrapolated_vsync_time(now);
    assert_eq!(extrapolated, 5 * VSYNC_INTERVAL_60HZ);
    assert_eq!((extrapolated - display.last_vsync_time()) % display.vsync_interval(), 0);

    // Time before the last vsync never extrapolates backwards.
    assert_eq!(display.extrapolated_vsync_time(0), VSYNC_INTERVAL_60HZ);
}

// ============================================================================
// Claiming
// ============================================================================

#[test]
fn a_display_can_only_be_claimed_once() {
    let display = test_display();
    display.claim().expect("first claim");
    assert!(matches!(
        display.claim(),
        Err(PrismError::DisplayAlreadyClaimed(1))
    ));
    display.unclaim().expect("unclaim");
    display.claim().expect("reclaim");
}

#[test]
fn unclaiming_an_unclaimed_display_fails() {
    let display = test_display();
    assert!(matches!(
        display.unclaim(),
        Err(PrismError::DisplayNotClaimed(1))
    ));
}

// ============================================================================
// Display manager
// ============================================================================

#[test]
fn the_first_display_becomes_the_default() {
    let (manager, controller) = new_display_manager();
    let manager = manager.borrow();
    let display = manager.default_display().expect("default display");
    assert_eq!(display.id(), 1);
    assert_eq!(display.width_px(), 1024);
    assert_eq!(display.height_px(), 600);
    // A hardware layer was created and assigned.
    assert_eq!(controller.0.borrow().layers.len(), 1);
}

#[test]
fn ownership_changes_reach_the_display() {
    let (manager, _controller) = new_display_manager();
    let display = manager.borrow().default_display().cloned().expect("display");
    assert!(!display.is_owned());
    manager.borrow_mut().client_ownership_change(true);
    assert!(display.is_owned());
    manager.borrow_mut().client_ownership_change(false);
    assert!(!display.is_owned());
}

#[test]
fn removing_the_default_display_marks_the_manager_lost() {
    let (manager, _controller) = new_display_manager();
    assert!(!manager.borrow().is_display_lost());
    manager
        .borrow_mut()
        .displays_changed(Vec::new(), vec![1])
        .expect("removal");
    assert!(manager.borrow().is_display_lost());
}

#[test]
fn vsync_for_other_displays_is_filtered_out() {
    let (manager, _controller) = new_display_manager();
    let display = manager.borrow().default_display().cloned().expect("display");
    manager.borrow_mut().vsync(99, 5_000_000, &[]);
    assert_eq!(display.last_vsync_time(), 0);
    manager.borrow_mut().vsync(1, 5_000_000, &[]);
    assert_eq!(display.last_vsync_time(), 5_000_000);
}

#[test]
fn additional_displays_do_not_replace_the_default() {
    let (manager, _controller) = new_display_manager();
    manager
        .borrow_mut()
        .displays_changed(
            vec![DisplayInfo {
                id: 2,
                width_px: 640,
                height_px: 480,
                pixel_formats: vec![PixelFormat::Rgbx8888],
            }],
            Vec::new(),
        )
        .expect("second display");
    assert_eq!(manager.borrow().default_display().expect("default").id(), 1);
}
