//! Per-frame timing aggregation.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use log::error;

use crate::dispatch::Nanos;

/// Sentinel: the measurement has not been recorded yet.
pub const TIME_UNINITIALIZED: Nanos = Nanos::MIN;

/// Sentinel: the measurement was dropped and will never arrive.
pub const TIME_DROPPED: Nanos = Nanos::MAX;

/// All timestamps tracked for one frame. Values are subject to change
/// until the frame is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamps {
    /// When the scheduler committed to applying this frame's updates.
    pub latch_point_time: Nanos,
    /// When session updates finished applying.
    pub update_done_time: Nanos,
    /// When rendering started.
    pub render_start_time: Nanos,
    /// When the slowest swapchain reported render completion.
    pub render_done_time: Nanos,
    /// The vsync this frame was aiming for.
    pub target_presentation_time: Nanos,
    /// When the frame actually reached the screen ([`TIME_DROPPED`] if it
    /// never did).
    pub actual_presentation_time: Nanos,
}

/// Receives notification when a frame finishes rendering and when it is
/// fully presented (or dropped). Implemented by the frame scheduler.
pub trait FrameTimingsListener {
    /// All swapchains reported render completion for `timings`.
    fn on_frame_rendered(&self, timings: &Rc<FrameTimings>);
    /// `timings` is finalized: every swapchain reported both a rendered
    /// and a presented/dropped result.
    fn on_frame_presented(&self, timings: &Rc<FrameTimings>);
}

#[derive(Clone, Copy)]
struct SwapchainRecord {
    frame_rendered_time: Nanos,
    frame_presented_time: Nanos,
}

struct State {
    records: Vec<SwapchainRecord>,
    frame_rendered_count: usize,
    frame_presented_count: usize,
    updates_finished_time: Nanos,
    rendering_finished_time: Nanos,
    actual_presentation_time: Nanos,
    frame_was_dropped: bool,
    finalized: bool,
}

/// Collects timing information for all swapchains rendered to during one
/// frame.
///
/// Each swapchain registers itself with [`register_swapchain`]
/// (obtaining an index) and later reports render completion plus either
/// presentation or a drop. Once every swapchain has reported both, the
/// frame is finalized and the listener's `on_frame_presented` fires.
/// Render and present notifications carry no ordering guarantee relative
/// to each other — the event timestamper redispatches both — so
/// finalization waits for the full set.
///
/// [`register_swapchain`]: FrameTimings::register_swapchain
pub struct FrameTimings {
    listener: Weak<dyn FrameTimingsListener>,
    frame_number: u64,
    target_presentation_time: Nanos,
    latch_point_time: Nanos,
    rendering_started_time: Nanos,
    state: RefCell<State>,
}

impl FrameTimings {
    /// Creates the timing record for frame `frame_number`.
    #[must_use]
    pub fn new(
        listener: Weak<dyn FrameTimingsListener>,
        frame_number: u64,
        target_presentation_time: Nanos,
        latch_point_time: Nanos,
        rendering_started_time: Nanos,
    ) -> Rc<Self> {
        Rc::new(Self {
            listener,
            frame_number,
            target_presentation_time,
            latch_point_time,
            rendering_started_time,
            state: RefCell::new(State {
                records: Vec::new(),
                frame_rendered_count: 0,
                frame_presented_count: 0,
                updates_finished_time: TIME_UNINITIALIZED,
                rendering_finished_time: TIME_UNINITIALIZED,
                actual_presentation_time: TIME_UNINITIALIZED,
                frame_was_dropped: false,
                finalized: false,
            }),
        })
    }

    /// Registers a swapchain used as a render target this frame,
    /// returning the index it reports back with. Each swapchain registers
    /// exactly once, before any report arrives.
    pub fn register_swapchain(&self) -> usize {
        let mut state = self.state.borrow_mut();
        debug_assert!(!state.finalized);
        debug_assert_eq!(state.frame_rendered_count, 0);
        debug_assert_eq!(state.frame_presented_count, 0);
        state.records.push(SwapchainRecord {
            frame_rendered_time: TIME_UNINITIALIZED,
            frame_presented_time: TIME_UNINITIALIZED,
        });
        state.records.len() - 1
    }

    /// Records the time at which session updates finished applying.
    pub fn on_frame_updated(&self, time: Nanos) {
        let mut state = self.state.borrow_mut();
        debug_assert!(state.updates_finished_time == TIME_UNINITIALIZED);
        debug_assert!(time >= self.latch_point_time);
        state.updates_finished_time = time;
    }

    /// Records render completion on swapchain `swapchain_index`.
    pub fn on_frame_rendered(self: &Rc<Self>, swapchain_index: usize, time: Nanos) {
        let all_rendered = {
            let mut state = self.state.borrow_mut();
            debug_assert!(swapchain_index < state.records.len());
            debug_assert!(
                state.records[swapchain_index].frame_rendered_time == TIME_UNINITIALIZED
            );
            state.records[swapchain_index].frame_rendered_time = time;
            state.frame_rendered_count += 1;
            state.rendering_finished_time = state.rendering_finished_time.max(time);
            state.frame_rendered_count == state.records.len()
        };
        if all_rendered {
            if let Some(listener) = self.listener.upgrade() {
                listener.on_frame_rendered(self);
            }
            self.maybe_finalize();
        }
    }

    /// Records presentation on swapchain `swapchain_index`.
    pub fn on_frame_presented(self: &Rc<Self>, swapchain_index: usize, time: Nanos) {
        self.record_presented(swapchain_index, time);
    }

    /// Records that swapchain `swapchain_index` dropped this frame.
    pub fn on_frame_dropped(self: &Rc<Self>, swapchain_index: usize) {
        {
            let mut state = self.state.borrow_mut();
            state.frame_was_dropped = true;
        }
        self.record_presented(swapchain_index, TIME_DROPPED);
    }

    fn record_presented(self: &Rc<Self>, swapchain_index: usize, time: Nanos) {
        {
            let mut state = self.state.borrow_mut();
            debug_assert!(swapchain_index < state.records.len());
            debug_assert!(
                state.records[swapchain_index].frame_presented_time == TIME_UNINITIALIZED
            );
            state.records[swapchain_index].frame_presented_time = time;
            state.frame_presented_count += 1;
            state.actual_presentation_time = state.actual_presentation_time.max(time);
        }
        self.maybe_finalize();
    }

    fn maybe_finalize(self: &Rc<Self>) {
        let finalize = {
            let mut state = self.state.borrow_mut();
            if state.finalized {
                return;
            }
            let done = state.frame_rendered_count == state.records.len()
                && state.frame_presented_count == state.records.len();
            if done {
                state.finalized = true;
                Self::validate_render_times(&state);
            }
            done
        };
        if finalize {
            if let Some(listener) = self.listener.upgrade() {
                listener.on_frame_presented(self);
            }
        }
    }

    // Rendering must complete before the frame reaches the screen. The
    // event timestamper redispatches both signals, so this can only be
    // checked once both have arrived.
    fn validate_render_times(state: &State) {
        for record in &state.records {
            let rendered = record.frame_rendered_time;
            let presented = record.frame_presented_time;
            if rendered == TIME_UNINITIALIZED
                || presented == TIME_UNINITIALIZED
                || rendered == TIME_DROPPED
                || presented == TIME_DROPPED
            {
                continue;
            }
            if rendered > presented {
                error!(
                    "frame presented at {presented} ns before rendering finished at {rendered} ns"
                );
                debug_assert!(rendered <= presented);
            }
        }
    }

    /// The frame number this record belongs to.
    #[must_use]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// The vsync this frame targets.
    #[must_use]
    pub fn target_presentation_time(&self) -> Nanos {
        self.target_presentation_time
    }

    /// When the scheduler latched this frame's updates.
    #[must_use]
    pub fn latch_point_time(&self) -> Nanos {
        self.latch_point_time
    }

    /// When rendering started.
    #[must_use]
    pub fn rendering_started_time(&self) -> Nanos {
        self.rendering_started_time
    }

    /// When the slowest swapchain finished rendering. Subject to change
    /// until finalized.
    #[must_use]
    pub fn rendering_finished_time(&self) -> Nanos {
        self.state.borrow().rendering_finished_time
    }

    /// When the frame reached the screen (max across swapchains).
    #[must_use]
    pub fn actual_presentation_time(&self) -> Nanos {
        self.state.borrow().actual_presentation_time
    }

    /// `true` once every swapchain reported both results.
    #[must_use]
    pub fn finalized(&self) -> bool {
        self.state.borrow().finalized
    }

    /// `true` if at least one swapchain dropped this frame. Subject to
    /// change until finalized.
    #[must_use]
    pub fn frame_was_dropped(&self) -> bool {
        self.state.borrow().frame_was_dropped
    }

    /// A snapshot of every timestamp tracked for this frame.
    #[must_use]
    pub fn timestamps(&self) -> Timestamps {
        let state = self.state.borrow();
        Timestamps {
            latch_point_time: self.latch_point_time,
            update_done_time: state.updates_finished_time,
            render_start_time: self.rendering_started_time,
            render_done_time: state.rendering_finished_time,
            target_presentation_time: self.target_presentation_time,
            actual_presentation_time: state.actual_presentation_time,
        }
    }
}

impl std::fmt::Debug for FrameTimings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameTimings")
            .field("frame_number", &self.frame_number)
            .field("target", &self.target_presentation_time)
            .field("finalized", &self.finalized())
            .field("dropped", &self.frame_was_dropped())
            .finish()
    }
}
