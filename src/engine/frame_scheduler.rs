//! The vsync-driven frame scheduler.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::rc::{Rc, Weak};

use log::{info, warn};

use crate::dispatch::{Dispatcher, Nanos, WakeupHandle};
use crate::display::Display;
use crate::scene::SessionId;
use crate::session::{PresentationInfo, UpdateScheduler};
use crate::settings::CompositorSettings;

use super::frame_stats::{FrameStats, FrameStatsSummary};
use super::frame_timings::{FrameTimings, FrameTimingsListener, TIME_DROPPED};
use super::renderer::FrameRenderer;

/// One session's pending wish for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionUpdate {
    /// The session asking for an update.
    pub session_id: SessionId,
    /// The presentation time it asked for.
    pub requested_presentation_time: Nanos,
}

/// What applying a round of session updates produced.
#[derive(Debug, Default)]
pub struct UpdateResults {
    /// Whether anything changed that requires a render.
    pub needs_render: bool,
    /// Sessions whose acquire fences were not ready; they are re-queued
    /// at their requested times.
    pub sessions_to_reschedule: Vec<SessionUpdate>,
}

/// Applies scheduled session updates at the latch point.
pub trait SessionUpdater {
    /// Applies all due updates of `sessions` against the target time.
    fn update_sessions(
        &mut self,
        sessions: Vec<SessionUpdate>,
        frame_number: u64,
        presentation_time: Nanos,
        presentation_interval: Nanos,
    ) -> UpdateResults;

    /// Fires the present callbacks of every frame presented so far.
    fn signal_successful_present_callbacks(&mut self, info: PresentationInfo);
}

/// The scheduler's single delegate: updates sessions and renders frames.
pub trait SchedulerDelegate: SessionUpdater + FrameRenderer {}
impl<T: SessionUpdater + FrameRenderer> SchedulerDelegate for T {}

struct HeapEntry {
    requested_presentation_time: Nanos,
    seq: u64,
    session_id: SessionId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.requested_presentation_time == other.requested_presentation_time
            && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.requested_presentation_time, self.seq)
            .cmp(&(other.requested_presentation_time, other.seq))
    }
}

struct Inner {
    updatable_sessions: BinaryHeap<Reverse<HeapEntry>>,
    heap_seq: u64,
    render_continuously: bool,
    render_pending: bool,
    currently_rendering: bool,
    frame_number: u64,
    wakeup_time: Nanos,
    next_presentation_time: Nanos,
    frame_render_task: Option<WakeupHandle>,
    outstanding_frames: Vec<Rc<FrameTimings>>,
}

/// Computes wakeup/target-vsync pairs from per-session requested
/// presentation times, latches due updates, asks the renderer for a
/// frame, and tracks the frames still in flight.
pub struct FrameScheduler {
    dispatcher: Dispatcher,
    display: Rc<Display>,
    required_render_time: Nanos,
    max_outstanding_frames: usize,
    weak_self: Weak<FrameScheduler>,
    delegate: RefCell<Weak<RefCell<dyn SchedulerDelegate>>>,
    stats: RefCell<FrameStats>,
    inner: RefCell<Inner>,
}

impl FrameScheduler {
    /// Creates a scheduler driving `display`.
    #[must_use]
    pub fn new(
        dispatcher: Dispatcher,
        display: Rc<Display>,
        settings: &CompositorSettings,
    ) -> Rc<Self> {
        let stats = FrameStats::with_capacities(
            settings.stats_recent_frame_count,
            settings.stats_dropped_frame_count,
            settings.stats_delayed_frame_count,
        );
        Rc::new_cyclic(|weak| Self {
            dispatcher,
            display,
            required_render_time: settings.required_render_time,
            max_outstanding_frames: settings.swapchain_image_count.saturating_sub(1).max(1),
            weak_self: weak.clone(),
            delegate: RefCell::new(Weak::<RefCell<NullDelegate>>::new()),
            stats: RefCell::new(stats),
            inner: RefCell::new(Inner {
                updatable_sessions: BinaryHeap::new(),
                heap_seq: 0,
                render_continuously: false,
                render_pending: false,
                currently_rendering: false,
                frame_number: 0,
                wakeup_time: 0,
                next_presentation_time: 0,
                frame_render_task: None,
                outstanding_frames: Vec::new(),
            }),
        })
    }

    /// Installs the session-updater/frame-renderer delegate.
    pub fn set_delegate(&self, delegate: Weak<RefCell<dyn SchedulerDelegate>>) {
        *self.delegate.borrow_mut() = delegate;
    }

    /// The display this scheduler paces against.
    #[must_use]
    pub fn display(&self) -> &Rc<Display> {
        &self.display
    }

    /// Aggregate frame statistics.
    #[must_use]
    pub fn stats_summary(&self) -> FrameStatsSummary {
        self.stats.borrow().summary()
    }

    /// Number of rendered-but-not-finalized frames.
    #[must_use]
    pub fn outstanding_frame_count(&self) -> usize {
        self.inner.borrow().outstanding_frames.len()
    }

    /// When `true`, a new frame is requested whenever the previous one
    /// retires, regardless of session updates. Turning it off does not
    /// cancel an already-scheduled wakeup.
    pub fn set_render_continuously(&self, render_continuously: bool) {
        self.inner.borrow_mut().render_continuously = render_continuously;
        if render_continuously {
            self.request_frame();
        }
    }

    /// The predicted time needed to render one frame.
    ///
    /// A function rather than a constant so future implementations can
    /// fold in scene complexity and output resolution.
    #[must_use]
    pub fn predict_required_frame_render_time(&self) -> Nanos {
        self.required_render_time
    }

    /// Computes `(target_presentation_time, wakeup_time)` for a
    /// requested presentation time.
    ///
    /// The target is the first vsync at or after the requested time; the
    /// wakeup backs off from it by the predicted render time. The
    /// nanosecond subtracted before dividing avoids an off-by-one when
    /// the requested time was itself derived from a previously reported
    /// actual presentation time. Two catch-up loops handle the startup
    /// corner (clock near zero) and wakeups that have already passed.
    #[must_use]
    pub fn compute_presentation_and_wakeup_times(
        &self,
        requested_presentation_time: Nanos,
    ) -> (Nanos, Nanos) {
        let now = self.dispatcher.now();
        let last_vsync_time = self.display.extrapolated_vsync_time(now);
        let vsync_interval = self.display.vsync_interval();
        let required_render_time = self.predict_required_frame_render_time();

        let num_intervals = 1 + if requested_presentation_time <= last_vsync_time {
            0
        } else {
            (requested_presentation_time - last_vsync_time - 1) / vsync_interval
        };

        let mut target_presentation_time = last_vsync_time + num_intervals * vsync_interval;
        let mut wakeup_time = target_presentation_time - required_render_time;
        while required_render_time > target_presentation_time {
            target_presentation_time += vsync_interval;
            wakeup_time = target_presentation_time - required_render_time;
        }
        while wakeup_time < now {
            target_presentation_time += vsync_interval;
            wakeup_time += vsync_interval;
        }

        (target_presentation_time, wakeup_time)
    }

    /// Schedules (or re-schedules, if the new wakeup is earlier) the
    /// frame-render wakeup.
    pub fn request_frame(&self) {
        let mut inner = self.inner.borrow_mut();
        debug_assert!(
            !inner.updatable_sessions.is_empty()
                || inner.render_continuously
                || inner.render_pending
        );

        if inner.frame_number < 5 {
            info!("FrameScheduler::request_frame");
        }

        let requested_presentation_time =
            if inner.render_continuously || inner.render_pending {
                0
            } else {
                inner
                    .updatable_sessions
                    .peek()
                    .map_or(0, |Reverse(top)| top.requested_presentation_time)
            };

        let (new_presentation_time, new_wakeup_time) =
            self.compute_presentation_and_wakeup_times(requested_presentation_time);

        let task_pending = inner
            .frame_render_task
            .as_ref()
            .is_some_and(WakeupHandle::is_pending);
        if !task_pending || new_wakeup_time < inner.wakeup_time {
            if let Some(task) = inner.frame_render_task.take() {
                task.cancel();
            }
            inner.wakeup_time = new_wakeup_time;
            inner.next_presentation_time = new_presentation_time;
            let weak = self.weak_self.clone();
            inner.frame_render_task =
                Some(self.dispatcher.schedule_wakeup(new_wakeup_time, move || {
                    if let Some(scheduler) = weak.upgrade() {
                        scheduler.maybe_render_frame();
                    }
                }));
        }
    }

    /// Wakeup body: latch due updates, render if anything needs it.
    fn maybe_render_frame(&self) {
        let (presentation_time, wakeup_time, frame_number, sessions) = {
            let mut inner = self.inner.borrow_mut();
            let presentation_time = inner.next_presentation_time;
            let mut sessions = Vec::new();
            while let Some(Reverse(top)) = inner.updatable_sessions.peek() {
                if top.requested_presentation_time > presentation_time {
                    break;
                }
                let Reverse(top) = inner
                    .updatable_sessions
                    .pop()
                    .expect("session heap must be non-empty after peek");
                sessions.push(SessionUpdate {
                    session_id: top.session_id,
                    requested_presentation_time: top.requested_presentation_time,
                });
            }
            (
                presentation_time,
                inner.wakeup_time,
                inner.frame_number,
                sessions,
            )
        };
        let presentation_interval = self.display.vsync_interval();

        if frame_number < 5 {
            info!(
                "FrameScheduler::maybe_render_frame presentation_time={presentation_time} \
                 wakeup_time={wakeup_time} frame_number={frame_number}"
            );
        }

        let Some(delegate) = self.delegate.borrow().upgrade() else {
            return;
        };

        // Apply all due updates.
        let update_results = delegate.borrow_mut().update_sessions(
            sessions,
            frame_number,
            presentation_time,
            presentation_interval,
        );

        {
            let mut inner = self.inner.borrow_mut();
            for session in update_results.sessions_to_reschedule {
                let seq = inner.heap_seq;
                inner.heap_seq += 1;
                inner.updatable_sessions.push(Reverse(HeapEntry {
                    requested_presentation_time: session.requested_presentation_time,
                    seq,
                    session_id: session.session_id,
                }));
            }

            if !update_results.needs_render
                && !inner.render_pending
                && !inner.render_continuously
            {
                return;
            }

            // A frame is already on the GPU; render once it retires.
            if inner.currently_rendering {
                inner.render_pending = true;
                return;
            }

            debug_assert!(inner.outstanding_frames.len() < self.max_outstanding_frames);
        }

        let timings = FrameTimings::new(
            self.weak_self.clone() as Weak<dyn FrameTimingsListener>,
            frame_number,
            presentation_time,
            wakeup_time,
            self.dispatcher.now(),
        );
        timings.on_frame_updated(self.dispatcher.now());
        self.inner.borrow_mut().frame_number += 1;

        if frame_number < 5 {
            info!(
                "FrameScheduler: calling render_frame presentation_time={presentation_time} \
                 frame_number={frame_number}"
            );
        }

        let rendered =
            delegate
                .borrow_mut()
                .render_frame(&timings, presentation_time, presentation_interval);

        {
            let mut inner = self.inner.borrow_mut();
            if rendered {
                inner.outstanding_frames.push(timings);
                inner.currently_rendering = true;
                inner.render_pending = false;
            } else {
                warn!("renderer declined frame {frame_number}; nothing drawn");
            }
            if inner.updatable_sessions.is_empty() {
                return;
            }
        }
        // More sessions are waiting; schedule the next frame.
        self.request_frame();
    }
}

impl UpdateScheduler for FrameScheduler {
    fn schedule_update_for_session(&self, presentation_time: Nanos, session_id: SessionId) {
        {
            let mut inner = self.inner.borrow_mut();
            let seq = inner.heap_seq;
            inner.heap_seq += 1;
            inner.updatable_sessions.push(Reverse(HeapEntry {
                requested_presentation_time: presentation_time,
                seq,
                session_id,
            }));
        }
        self.request_frame();
    }
}

impl FrameTimingsListener for FrameScheduler {
    fn on_frame_rendered(&self, timings: &Rc<FrameTimings>) {
        if timings.frame_number() < 5 {
            info!(
                "FrameScheduler::on_frame_rendered frame_number={} time={}",
                timings.frame_number(),
                timings.rendering_finished_time()
            );
        }
    }

    /// A frame finalized. Finalization must arrive in frame-number
    /// order; anything else means the event timestamper produced bogus
    /// data.
    fn on_frame_presented(&self, timings: &Rc<FrameTimings>) {
        let (info, request_again) = {
            let mut inner = self.inner.borrow_mut();
            assert!(
                !inner.outstanding_frames.is_empty(),
                "frame finalized with no outstanding frames"
            );
            assert!(
                Rc::ptr_eq(&inner.outstanding_frames[0], timings),
                "out-of-order frame finalization"
            );
            let timings = inner.outstanding_frames.remove(0);
            inner.currently_rendering = false;

            let timestamps = timings.timestamps();
            let presentation_interval = self.display.vsync_interval();
            self.stats
                .borrow_mut()
                .record_frame(timestamps, presentation_interval);

            // Dropped frames report their target so clients are not
            // handed a sentinel; see the frame-drop policy note in the
            // stats module.
            let presentation_time = if timestamps.actual_presentation_time == TIME_DROPPED {
                timestamps.target_presentation_time
            } else {
                timestamps.actual_presentation_time
            };
            (
                PresentationInfo {
                    presentation_time,
                    presentation_interval,
                },
                inner.render_pending || inner.render_continuously,
            )
        };

        if let Some(delegate) = self.delegate.borrow().upgrade() {
            delegate.borrow_mut().signal_successful_present_callbacks(info);
        }
        if request_again {
            self.request_frame();
        }
    }
}

// Placeholder delegate type used only to build an empty Weak.
struct NullDelegate;
impl SessionUpdater for NullDelegate {
    fn update_sessions(
        &mut self,
        _sessions: Vec<SessionUpdate>,
        _frame_number: u64,
        _presentation_time: Nanos,
        _presentation_interval: Nanos,
    ) -> UpdateResults {
        UpdateResults::default()
    }
    fn signal_successful_present_callbacks(&mut self, _info: PresentationInfo) {}
}
impl FrameRenderer for NullDelegate {
    fn render_frame(
        &mut self,
        _timings: &Rc<FrameTimings>,
        _presentation_time: Nanos,
        _presentation_interval: Nanos,
    ) -> bool {
        false
    }
}
