//! Per-client session state and the update queue.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::rc::Weak;

use log::warn;
use rustc_hash::FxHashMap;

use crate::dispatch::{Dispatcher, Nanos};
use crate::errors::{SessionError, SessionResult};
use crate::scene::{ObjectKey, ResourceId, SessionId, INVALID_RESOURCE_ID};
use crate::sync::{Fence, FenceSetListener};

use super::applier::{self, CommandContext};
use super::command::Command;
use super::event::SessionEvent;

/// What a present callback receives once its frame reaches the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationInfo {
    /// When the frame was presented, in nanoseconds.
    pub presentation_time: Nanos,
    /// The display's vsync interval at that time.
    pub presentation_interval: Nanos,
}

/// Callback fired once a `Present`'s updates have been applied and the
/// frame containing them presented.
pub type PresentCallback = Box<dyn FnOnce(PresentationInfo)>;

/// Something that accepts "wake me for this session at this time"
/// requests. Implemented by the frame scheduler.
pub trait UpdateScheduler {
    /// Requests that `session_id`'s updates be considered for the frame
    /// targeting `presentation_time`.
    fn schedule_update_for_session(&self, presentation_time: Nanos, session_id: SessionId);
}

/// One scheduled `Present`: commands plus fences plus callback.
pub struct Update {
    /// Requested presentation time.
    pub presentation_time: Nanos,
    /// Commands to apply.
    pub commands: Vec<Command>,
    /// Acquire fences gating application.
    pub acquire_fences: FenceSetListener,
    /// Release fences staged for the frame after this one.
    pub release_fences: Vec<Fence>,
    /// Fired once presented.
    pub present_callback: PresentCallback,
}

struct ScheduledImagePipeUpdate {
    presentation_time: Nanos,
    seq: u64,
    pipe: ObjectKey,
}

impl PartialEq for ScheduledImagePipeUpdate {
    fn eq(&self, other: &Self) -> bool {
        self.presentation_time == other.presentation_time && self.seq == other.seq
    }
}
impl Eq for ScheduledImagePipeUpdate {}
impl PartialOrd for ScheduledImagePipeUpdate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledImagePipeUpdate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.presentation_time, self.seq).cmp(&(other.presentation_time, other.seq))
    }
}

/// Result of draining a session's due updates for one frame.
pub struct ApplyUpdateResult {
    /// `false` if a command failed; the session must be torn down.
    pub success: bool,
    /// The protocol error that caused the failure, if any.
    pub error: Option<SessionError>,
    /// Whether anything changed that requires a render.
    pub needs_render: bool,
    /// `false` if the front update's acquire fences were not ready.
    pub all_fences_ready: bool,
    /// Requested time of the stalled front update, for rescheduling.
    pub next_unready_time: Option<Nanos>,
    /// Present callbacks of applied session updates, in order.
    pub callbacks: Vec<PresentCallback>,
    /// Present callbacks of consumed image-pipe updates, in order.
    pub image_pipe_callbacks: Vec<PresentCallback>,
    /// Image pipes whose latched image changed; each needs exactly one
    /// GPU upload this frame.
    pub staged_uploads: Vec<ObjectKey>,
}

/// A single client's isolated resource namespace and update queue.
pub struct Session {
    id: SessionId,
    debug_name: String,
    dispatcher: Dispatcher,
    scheduler: Weak<dyn UpdateScheduler>,

    resources: FxHashMap<ResourceId, ObjectKey>,
    buffered_commands: Vec<Command>,
    scheduled_updates: VecDeque<Update>,
    scheduled_image_pipe_updates: BinaryHeap<Reverse<ScheduledImagePipeUpdate>>,
    image_pipe_update_seq: u64,

    last_applied_update_presentation_time: Nanos,
    fences_to_release_on_next_update: Vec<Fence>,

    events: VecDeque<SessionEvent>,
}

impl Session {
    /// Creates a session bound to the dispatcher and scheduler.
    #[must_use]
    pub fn new(
        id: SessionId,
        dispatcher: Dispatcher,
        scheduler: Weak<dyn UpdateScheduler>,
    ) -> Self {
        Self {
            id,
            debug_name: String::new(),
            dispatcher,
            scheduler,
            resources: FxHashMap::default(),
            buffered_commands: Vec::new(),
            scheduled_updates: VecDeque::new(),
            scheduled_image_pipe_updates: BinaryHeap::new(),
            image_pipe_update_seq: 0,
            last_applied_update_presentation_time: 0,
            fences_to_release_on_next_update: Vec::new(),
            events: VecDeque::new(),
        }
    }

    /// This session's id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The client-provided debug name (used in log messages).
    #[must_use]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// Sets the client-provided debug name.
    pub fn set_debug_name(&mut self, name: impl Into<String>) {
        self.debug_name = name.into();
    }

    /// Number of resource ids currently mapped.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Number of updates waiting to apply.
    #[must_use]
    pub fn scheduled_update_count(&self) -> usize {
        self.scheduled_updates.len()
    }

    /// The presentation time of the most recently applied update.
    #[must_use]
    pub fn last_applied_update_presentation_time(&self) -> Nanos {
        self.last_applied_update_presentation_time
    }

    // ========================================================================
    // Resource map
    // ========================================================================

    /// Resolves a client resource id to its arena key.
    pub fn resolve(&self, id: ResourceId) -> SessionResult<ObjectKey> {
        if id == INVALID_RESOURCE_ID {
            return Err(SessionError::ReservedResourceId);
        }
        self.resources
            .get(&id)
            .copied()
            .ok_or(SessionError::InvalidResourceId(id))
    }

    /// Fails if `id` is zero or already mapped.
    pub fn check_unmapped(&self, id: ResourceId) -> SessionResult<()> {
        if id == INVALID_RESOURCE_ID {
            return Err(SessionError::ReservedResourceId);
        }
        if self.resources.contains_key(&id) {
            return Err(SessionError::ResourceIdCollision(id));
        }
        Ok(())
    }

    /// Binds `id` to an arena key. The caller has already checked
    /// uniqueness.
    pub fn map_resource(&mut self, id: ResourceId, key: ObjectKey) {
        let previous = self.resources.insert(id, key);
        debug_assert!(previous.is_none());
    }

    /// Removes the binding for `id`, returning the arena key.
    pub fn unmap_resource(&mut self, id: ResourceId) -> SessionResult<ObjectKey> {
        if id == INVALID_RESOURCE_ID {
            return Err(SessionError::ReservedResourceId);
        }
        self.resources
            .remove(&id)
            .ok_or(SessionError::InvalidResourceId(id))
    }

    /// Drains the whole resource map (session teardown).
    pub fn take_resource_map(&mut self) -> FxHashMap<ResourceId, ObjectKey> {
        std::mem::take(&mut self.resources)
    }

    /// Drains the release fences staged by the last applied update.
    ///
    /// On teardown these still belong to an update the server consumed,
    /// so they must reach the signaller; fences of never-applied updates
    /// die with the queue instead.
    pub fn take_pending_release_fences(&mut self) -> Vec<Fence> {
        std::mem::take(&mut self.fences_to_release_on_next_update)
    }

    // ========================================================================
    // Update queue
    // ========================================================================

    /// Buffers commands for the next `Present`.
    pub fn enqueue(&mut self, commands: Vec<Command>) {
        self.buffered_commands.extend(commands);
    }

    /// Submits the buffered commands for presentation at or after
    /// `requested_presentation_time`.
    ///
    /// # Errors
    ///
    /// [`SessionError::OutOfOrderPresent`] if the requested time is
    /// earlier than the latest applied or queued presentation time; the
    /// update is discarded.
    pub fn present(
        &mut self,
        requested_presentation_time: Nanos,
        acquire_fences: Vec<Fence>,
        release_fences: Vec<Fence>,
        callback: PresentCallback,
    ) -> SessionResult<()> {
        let commands = std::mem::take(&mut self.buffered_commands);
        self.schedule_update(
            requested_presentation_time,
            commands,
            acquire_fences,
            release_fences,
            callback,
        )
    }

    /// Queues an update and arms its acquire-fence listener; when the
    /// whole set is ready the frame scheduler is asked to schedule this
    /// session.
    pub fn schedule_update(
        &mut self,
        requested_presentation_time: Nanos,
        commands: Vec<Command>,
        acquire_fences: Vec<Fence>,
        release_fences: Vec<Fence>,
        callback: PresentCallback,
    ) -> SessionResult<()> {
        // Clients must present in order.
        let mut last_scheduled = self.last_applied_update_presentation_time;
        if let Some(back) = self.scheduled_updates.back() {
            last_scheduled = last_scheduled.max(back.presentation_time);
        }
        if requested_presentation_time < last_scheduled {
            return Err(SessionError::OutOfOrderPresent {
                requested: requested_presentation_time,
                last_scheduled,
            });
        }

        let acquire_fences = FenceSetListener::new(acquire_fences);
        let scheduler = self.scheduler.clone();
        let session_id = self.id;
        acquire_fences.wait_ready_async(&self.dispatcher, move || {
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.schedule_update_for_session(requested_presentation_time, session_id);
            }
        });

        self.scheduled_updates.push_back(Update {
            presentation_time: requested_presentation_time,
            commands,
            acquire_fences,
            release_fences,
            present_callback: callback,
        });
        Ok(())
    }

    /// Queues an image-pipe update and asks the scheduler for a frame.
    pub fn schedule_image_pipe_update(&mut self, presentation_time: Nanos, pipe: ObjectKey) {
        let seq = self.image_pipe_update_seq;
        self.image_pipe_update_seq += 1;
        self.scheduled_image_pipe_updates
            .push(Reverse(ScheduledImagePipeUpdate {
                presentation_time,
                seq,
                pipe,
            }));
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.schedule_update_for_session(presentation_time, self.id);
        }
    }

    /// Applies every due update whose acquire fences are ready.
    ///
    /// Follows the per-frame contract: apply commands, stage the
    /// *previous* update's release fences with the signaller, stash this
    /// update's release fences for the next apply, collect the present
    /// callback. Stops at the first update whose fences are not ready
    /// (the session gets rescheduled). A command failure clears the
    /// whole queue and reports the session for teardown.
    pub fn apply_scheduled_updates(
        &mut self,
        ctx: &mut CommandContext<'_>,
        target_presentation_time: Nanos,
    ) -> ApplyUpdateResult {
        debug_assert!(target_presentation_time >= self.last_applied_update_presentation_time);

        let mut results = ApplyUpdateResult {
            success: false,
            error: None,
            needs_render: false,
            all_fences_ready: true,
            next_unready_time: None,
            callbacks: Vec::new(),
            image_pipe_callbacks: Vec::new(),
            staged_uploads: Vec::new(),
        };

        while let Some(front) = self.scheduled_updates.front() {
            if front.presentation_time >= target_presentation_time {
                break;
            }
            debug_assert!(
                self.last_applied_update_presentation_time <= front.presentation_time
            );

            if !front.acquire_fences.ready() {
                results.all_fences_ready = false;
                results.next_unready_time = Some(front.presentation_time);
                break;
            }

            let update = self
                .scheduled_updates
                .pop_front()
                .expect("scheduled update must exist after the front was inspected");

            if let Err(error) = self.apply_commands(ctx, update.commands) {
                warn!(
                    "session {} ({}): error while applying update, initiating teardown: {error}",
                    self.id, self.debug_name
                );
                results.error = Some(error);
                self.scheduled_updates.clear();
                return results;
            }

            for fence in self.fences_to_release_on_next_update.drain(..) {
                if let Err(error) = ctx.release_signaller.add_cpu_release_fence(fence) {
                    warn!("session {}: failed to stage release fence: {error}", self.id);
                }
            }
            self.fences_to_release_on_next_update = update.release_fences;

            self.last_applied_update_presentation_time = update.presentation_time;
            results.callbacks.push(update.present_callback);
            results.needs_render = true;
        }

        // Drain due image-pipe updates; each pipe uploads at most once
        // per frame regardless of how many updates were consumed.
        while let Some(Reverse(top)) = self.scheduled_image_pipe_updates.peek() {
            if top.presentation_time > target_presentation_time {
                break;
            }
            let Reverse(update) = self
                .scheduled_image_pipe_updates
                .pop()
                .expect("image pipe update heap must be non-empty after peek");
            let pipe = match ctx.graph.arena().get(update.pipe).map(|r| &r.kind) {
                Some(crate::scene::ResourceKind::ImagePipe(pipe)) => std::rc::Rc::clone(pipe),
                _ => continue,
            };
            let pipe_results = pipe
                .borrow_mut()
                .update(ctx.release_signaller, target_presentation_time);
            results
                .image_pipe_callbacks
                .extend(pipe_results.callbacks);
            if pipe_results.image_updated && !results.staged_uploads.contains(&update.pipe) {
                results.staged_uploads.push(update.pipe);
                results.needs_render = true;
            }
        }

        results.success = true;
        results
    }

    fn apply_commands(
        &mut self,
        ctx: &mut CommandContext<'_>,
        commands: Vec<Command>,
    ) -> SessionResult<()> {
        for command in commands {
            applier::apply_command(ctx, self, command)?;
        }
        Ok(())
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Queues an event for delivery to this session's client.
    pub fn enqueue_event(&mut self, event: SessionEvent) {
        self.events.push_back(event);
    }

    /// Drains the queued events.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("debug_name", &self.debug_name)
            .field("resources", &self.resources.len())
            .field("scheduled_updates", &self.scheduled_updates.len())
            .finish()
    }
}
