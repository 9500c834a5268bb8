//! Swapchain Tests
//!
//! Tests for:
//! - Flip staging and driver event-id release
//! - Vsync presented/dropped bookkeeping (including frames shown twice
//!   and frames dropped exactly once)
//! - Teardown synthesis for in-flight frames

mod common;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use smallvec::smallvec;

use common::{new_display_manager, ControllerHandle, VSYNC};
use prism::dispatch::Dispatcher;
use prism::display::DisplayManager;
use prism::engine::{FrameTimings, FrameTimingsListener, TIME_DROPPED};
use prism::swapchain::{DisplaySwapchain, HardwareLayerAssignment, HardwareLayerItem};
use prism::sync::GpuSemaphore;

#[derive(Default)]
struct ListenerLog {
    rendered: Vec<u64>,
    presented: Vec<(u64, i64)>,
    dropped: Vec<u64>,
}

#[derive(Default)]
struct RecordingListener {
    log: RefCell<ListenerLog>,
}

impl FrameTimingsListener for RecordingListener {
    fn on_frame_rendered(&self, timings: &Rc<FrameTimings>) {
        self.log.borrow_mut().rendered.push(timings.frame_number());
    }
    fn on_frame_presented(&self, timings: &Rc<FrameTimings>) {
        if timings.frame_was_dropped() {
            self.log.borrow_mut().dropped.push(timings.frame_number());
        } else {
            self.log
                .borrow_mut()
                .presented
                .push((timings.frame_number(), timings.actual_presentation_time()));
        }
    }
}

struct Fixture {
    dispatcher: Dispatcher,
    manager: Rc<RefCell<DisplayManager>>,
    controller: ControllerHandle,
    swapchain: DisplaySwapchain,
    listener: Rc<RecordingListener>,
    frame_number: u64,
}

impl Fixture {
    fn new() -> Self {
        let dispatcher = Dispatcher::new_manual();
        let (manager, controller) = new_display_manager();
        let display = manager
            .borrow()
            .default_display()
            .cloned()
            .expect("default display");
        let swapchain = DisplaySwapchain::new(dispatcher.clone(), &manager, display, 3)
            .expect("swapchain setup");
        Self {
            dispatcher,
            manager,
            controller,
            swapchain,
            listener: Rc::new(RecordingListener::default()),
            frame_number: 0,
        }
    }

    /// Draws one frame, returning its timings and the flipped image id.
    /// The fake GPU signals render-done immediately.
    fn draw_frame(&mut self) -> (Rc<FrameTimings>, u64) {
        self.frame_number += 1;
        let now = self.dispatcher.now();
        let timings = FrameTimings::new(
            Rc::downgrade(&self.listener) as Weak<dyn FrameTimingsListener>,
            self.frame_number,
            now + VSYNC,
            now,
            now,
        );
        let hla = HardwareLayerAssignment {
            items: smallvec![HardwareLayerItem {
                hardware_layer_id: 0,
                layers: Vec::new(),
            }],
        };
        let render_done: Rc<RefCell<Option<GpuSemaphore>>> = Rc::new(RefCell::new(None));
        {
            let render_done = Rc::clone(&render_done);
            self.swapchain
                .draw_and_present_frame(&timings, &hla, &mut |_, _, _, _, semaphore| {
                    *render_done.borrow_mut() = semaphore.cloned();
                })
                .expect("draw");
        }
        let semaphore = render_done.borrow_mut().take().expect("render-done semaphore");
        semaphore.fence().signal();
        self.dispatcher.run_until_idle();

        let image_id = self.controller.last_flip().expect("flip").image_id;
        (timings, image_id)
    }

    fn vsync(&self, image_id: u64) {
        let now = self.dispatcher.now();
        self.manager.borrow_mut().vsync(1, now, &[image_id]);
        self.dispatcher.run_until_idle();
    }
}

// ============================================================================
// Flip plumbing
// ============================================================================

#[test]
fn draw_flips_and_releases_the_imported_event_ids() {
    let mut fixture = Fixture::new();
    let (_timings, _image) = fixture.draw_frame();

    let state = fixture.controller.0.borrow();
    assert_eq!(state.flips.len(), 1);
    assert_eq!(state.applied_configs, 1);
    // Both per-frame events were imported and then released; the driver
    // kept its duplicates.
    assert_eq!(state.released_events.len(), 2);
    assert!(state.events.is_empty());
}

#[test]
fn the_final_layer_gets_the_render_done_semaphore() {
    let mut fixture = Fixture::new();
    // draw_frame() unwraps the semaphore; reaching here proves it was
    // handed to the single (final) layer.
    let (timings, _) = fixture.draw_frame();
    assert_eq!(fixture.listener.log.borrow().rendered, vec![1]);
    assert!(!timings.finalized());
}

#[test]
fn successive_frames_use_distinct_backbuffers() {
    let mut fixture = Fixture::new();
    let (_, first) = fixture.draw_frame();
    let (_, second) = fixture.draw_frame();
    let (_, third) = fixture.draw_frame();
    assert_ne!(first, second);
    assert_ne!(second, third);
    assert_ne!(first, third);
    assert_eq!(fixture.swapchain.outstanding_frame_count(), 3);
}

// ============================================================================
// Vsync bookkeeping
// ============================================================================

#[test]
fn vsync_with_the_matching_image_presents_the_frame() {
    let mut fixture = Fixture::new();
    let (timings, image) = fixture.draw_frame();

    fixture.dispatcher.advance_by(VSYNC);
    fixture.vsync(image);

    assert!(timings.finalized());
    assert!(!timings.frame_was_dropped());
    let log = fixture.listener.log.borrow();
    assert_eq!(log.presented.len(), 1);
    assert_eq!(log.presented[0], (1, fixture.dispatcher.now()));
}

#[test]
fn a_frame_shown_twice_is_reported_once() {
    let mut fixture = Fixture::new();
    let (_timings, image) = fixture.draw_frame();

    fixture.vsync(image);
    fixture.dispatcher.advance_by(VSYNC);
    fixture.vsync(image);

    let log = fixture.listener.log.borrow();
    assert_eq!(log.presented.len(), 1);
    assert!(log.dropped.is_empty());
}

#[test]
fn a_skipped_frame_is_dropped_exactly_once() {
    let mut fixture = Fixture::new();
    let (timings_a, image_a) = fixture.draw_frame();
    fixture.vsync(image_a);

    let (timings_b, _image_b) = fixture.draw_frame();
    let (timings_c, image_c) = fixture.draw_frame();

    // The controller skips straight from A to C.
    fixture.dispatcher.advance_by(VSYNC);
    fixture.vsync(image_c);

    assert!(timings_a.finalized() && !timings_a.frame_was_dropped());
    assert!(timings_b.finalized() && timings_b.frame_was_dropped());
    assert!(timings_c.finalized() && !timings_c.frame_was_dropped());

    let log = fixture.listener.log.borrow();
    assert_eq!(log.dropped, vec![2]);
    assert_eq!(log.presented.len(), 2);
}

#[test]
fn scanning_past_frames_shrinks_the_outstanding_count() {
    let mut fixture = Fixture::new();
    let (_, _image_a) = fixture.draw_frame();
    let (_, _image_b) = fixture.draw_frame();
    let (_, image_c) = fixture.draw_frame();
    assert_eq!(fixture.swapchain.outstanding_frame_count(), 3);

    fixture.vsync(image_c);
    // A and B were scanned past; C remains the displayed frame.
    assert_eq!(fixture.swapchain.outstanding_frame_count(), 1);
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn teardown_synthesizes_results_for_in_flight_frames() {
    let dispatcher = Dispatcher::new_manual();
    let (manager, controller) = new_display_manager();
    let display = manager
        .borrow()
        .default_display()
        .cloned()
        .expect("default display");
    let listener = Rc::new(RecordingListener::default());

    let timings = {
        let swapchain = DisplaySwapchain::new(dispatcher.clone(), &manager, display, 3)
            .expect("swapchain setup");
        let timings = FrameTimings::new(
            Rc::downgrade(&listener) as Weak<dyn FrameTimingsListener>,
            1,
            VSYNC,
            0,
            0,
        );
        let hla = HardwareLayerAssignment {
            items: smallvec![HardwareLayerItem {
                hardware_layer_id: 0,
                layers: Vec::new(),
            }],
        };
        // Render never finishes and no vsync arrives.
        swapchain
            .draw_and_present_frame(&timings, &hla, &mut |_, _, _, _, _| {})
            .expect("draw");
        timings
    };

    assert!(timings.finalized());
    assert!(timings.frame_was_dropped());
    assert_eq!(timings.rendering_finished_time(), TIME_DROPPED);
    assert!(!controller.vsync_enabled());
    // Framebuffers went back to the driver.
    assert_eq!(controller.0.borrow().released_images.len(), 3);
}
