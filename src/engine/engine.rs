//! The engine: session updater and frame renderer in one.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use glam::Vec3;
use log::{error, warn};
use rustc_hash::FxHashMap;
use smallvec::smallvec;

use crate::dispatch::{Dispatcher, Nanos};
use crate::display::DisplayManager;
use crate::errors::{PrismError, Result, SessionError, SessionResult};
use crate::link::{LinkAction, LinkSide, ViewLinker};
use crate::scene::{
    EventMask, Hit, HitTester, Metrics, ObjectKey, Ray, ResourceId, ResourceKind, SceneGraph,
    SessionId,
};
use crate::scene::graph::GraphEffect;
use crate::session::image_pipe::ImagePipeImageInfo;
use crate::session::{
    Command, CommandContext, PresentCallback, PresentationInfo, Session, SessionManager,
    UpdateScheduler,
};
use crate::settings::CompositorSettings;
use crate::swapchain::{DisplaySwapchain, HardwareLayerAssignment, HardwareLayerItem};
use crate::sync::{CommandBufferSequencer, Fence, FenceWatch, ReleaseFenceSignaller};

use super::frame_scheduler::{
    FrameScheduler, SchedulerDelegate, SessionUpdate, SessionUpdater, UpdateResults,
};
use super::frame_timings::FrameTimings;
use super::renderer::{FrameRenderer, LayerRenderer};

struct EngineInner {
    dispatcher: Dispatcher,
    weak_self: Weak<RefCell<EngineInner>>,
    graph: SceneGraph,
    linker: ViewLinker,
    session_manager: SessionManager,
    release_signaller: ReleaseFenceSignaller,
    layer_renderer: Box<dyn LayerRenderer>,
    swapchain: Option<DisplaySwapchain>,
    link_peer_closed: Rc<dyn Fn(u64, LinkSide)>,
    render_watches: FxHashMap<ObjectKey, FenceWatch>,
    // Present callbacks collected while applying updates; ratcheted into
    // the pending list when their frame starts rendering, fired when a
    // frame is presented.
    callbacks_this_frame: Vec<PresentCallback>,
    pending_callbacks: Vec<PresentCallback>,
    staged_uploads: Vec<ObjectKey>,
}

/// The compositor core: owns the scene graph, the sessions, the view
/// linker, the release-fence signaller, and the swapchain, and serves as
/// the frame scheduler's delegate.
pub struct Engine {
    dispatcher: Dispatcher,
    display_manager: Rc<RefCell<DisplayManager>>,
    scheduler: Rc<FrameScheduler>,
    sequencer: CommandBufferSequencer,
    inner: Rc<RefCell<EngineInner>>,
}

impl Engine {
    /// Creates an engine over an already-configured display manager
    /// (the default display must have arrived).
    ///
    /// # Errors
    ///
    /// [`PrismError::DisplayLost`] if there is no default display, or
    /// any swapchain construction failure.
    pub fn new(
        dispatcher: Dispatcher,
        display_manager: Rc<RefCell<DisplayManager>>,
        layer_renderer: Box<dyn LayerRenderer>,
        settings: &CompositorSettings,
    ) -> Result<Self> {
        let display = display_manager
            .borrow()
            .default_display()
            .cloned()
            .ok_or(PrismError::DisplayLost)?;

        let swapchain = DisplaySwapchain::new(
            dispatcher.clone(),
            &display_manager,
            Rc::clone(&display),
            settings.swapchain_image_count,
        )?;
        let scheduler = FrameScheduler::new(dispatcher.clone(), display, settings);
        let sequencer = CommandBufferSequencer::new();
        let release_signaller = ReleaseFenceSignaller::new(sequencer.clone());

        let inner = Rc::new_cyclic(|weak: &Weak<RefCell<EngineInner>>| {
            let hook: Rc<dyn Fn(u64, LinkSide)> = {
                let weak = weak.clone();
                Rc::new(move |koid, side| {
                    if let Some(inner) = weak.upgrade() {
                        inner.borrow_mut().on_link_peer_closed(koid, side);
                    }
                })
            };
            RefCell::new(EngineInner {
                dispatcher: dispatcher.clone(),
                weak_self: weak.clone(),
                graph: SceneGraph::new(),
                linker: ViewLinker::new(),
                session_manager: SessionManager::new(),
                release_signaller,
                layer_renderer,
                swapchain: Some(swapchain),
                link_peer_closed: hook,
                render_watches: FxHashMap::default(),
                callbacks_this_frame: Vec::new(),
                pending_callbacks: Vec::new(),
                staged_uploads: Vec::new(),
            })
        });
        scheduler
            .set_delegate(Rc::downgrade(&inner) as Weak<RefCell<dyn SchedulerDelegate>>);

        Ok(Self {
            dispatcher,
            display_manager,
            scheduler,
            sequencer,
            inner,
        })
    }

    /// The dispatcher everything runs on.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The display manager (driver glue).
    #[must_use]
    pub fn display_manager(&self) -> &Rc<RefCell<DisplayManager>> {
        &self.display_manager
    }

    /// The frame scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Rc<FrameScheduler> {
        &self.scheduler
    }

    /// The command-buffer sequencer shared with the renderer.
    #[must_use]
    pub fn command_buffer_sequencer(&self) -> CommandBufferSequencer {
        self.sequencer.clone()
    }

    /// Reports GPU completion of every command buffer up to and
    /// including `sequence_number`, releasing the fences waiting on it.
    pub fn on_command_buffer_finished(&self, sequence_number: u64) {
        self.inner
            .borrow_mut()
            .release_signaller
            .on_command_buffer_finished(sequence_number);
    }

    // ========================================================================
    // Session lifecycle & client surface
    // ========================================================================

    /// Creates a new client session.
    pub fn create_session(&self) -> Rc<RefCell<Session>> {
        let scheduler = Rc::downgrade(&self.scheduler) as Weak<dyn UpdateScheduler>;
        self.inner
            .borrow_mut()
            .session_manager
            .create_session(self.dispatcher.clone(), scheduler)
    }

    /// Looks up a live session.
    #[must_use]
    pub fn session(&self, session_id: SessionId) -> Option<Rc<RefCell<Session>>> {
        self.inner.borrow().session_manager.find_session(session_id)
    }

    /// Tears down a session: its channel closed or it committed a
    /// protocol error. All of its resources are released; other sessions
    /// are unaffected.
    pub fn kill_session(&self, session_id: SessionId) {
        self.inner.borrow_mut().kill_session_locked(session_id);
    }

    /// Buffers commands on a session.
    pub fn enqueue(&self, session_id: SessionId, commands: Vec<Command>) -> SessionResult<()> {
        let session = self.session_or_err(session_id)?;
        session.borrow_mut().enqueue(commands);
        Ok(())
    }

    /// Submits a session's buffered commands for presentation.
    pub fn present(
        &self,
        session_id: SessionId,
        requested_presentation_time: Nanos,
        acquire_fences: Vec<Fence>,
        release_fences: Vec<Fence>,
        callback: PresentCallback,
    ) -> SessionResult<()> {
        let session = self.session_or_err(session_id)?;
        let mut session = session.borrow_mut();
        session.present(
            requested_presentation_time,
            acquire_fences,
            release_fences,
            callback,
        )
    }

    /// Drains the events queued for a session's client.
    pub fn take_session_events(&self, session_id: SessionId) -> Vec<crate::session::SessionEvent> {
        self.session(session_id)
            .map(|session| session.borrow_mut().take_events())
            .unwrap_or_default()
    }

    /// Registers an image with one of a session's image pipes.
    pub fn image_pipe_add_image(
        &self,
        session_id: SessionId,
        pipe_id: ResourceId,
        image_id: u32,
        info: ImagePipeImageInfo,
    ) -> SessionResult<()> {
        let pipe = self.resolve_image_pipe(session_id, pipe_id)?;
        let result = pipe.borrow_mut().add_image(image_id, info);
        result
    }

    /// Presents an image on one of a session's image pipes.
    pub fn image_pipe_present_image(
        &self,
        session_id: SessionId,
        pipe_id: ResourceId,
        image_id: u32,
        presentation_time: Nanos,
        acquire_fences: Vec<Fence>,
        release_fences: Vec<Fence>,
        callback: PresentCallback,
    ) -> SessionResult<()> {
        let session = self.session_or_err(session_id)?;
        let pipe_key = session.borrow().resolve(pipe_id)?;
        let pipe = self.resolve_image_pipe(session_id, pipe_id)?;
        pipe.borrow_mut().present_image(
            image_id,
            presentation_time,
            acquire_fences,
            release_fences,
            callback,
        )?;
        session
            .borrow_mut()
            .schedule_image_pipe_update(presentation_time, pipe_key);
        Ok(())
    }

    /// Session-scoped hit test from a named node.
    pub fn hit_test(
        &self,
        session_id: SessionId,
        node_id: ResourceId,
        ray_origin: Vec3,
        ray_direction: Vec3,
    ) -> SessionResult<Vec<Hit>> {
        let session = self.session_or_err(session_id)?;
        let key = session.borrow().resolve(node_id)?;
        let inner = self.inner.borrow();
        let tester = HitTester::new_session_scoped(&inner.graph, session_id);
        Ok(tester.hit_test(key, Ray::new(ray_origin, ray_direction)))
    }

    /// Global hit test in unscaled device coordinates, through the
    /// primary compositor's layer stack (top layer first).
    #[must_use]
    pub fn hit_test_device_ray(&self, ray_origin: Vec3, ray_direction: Vec3) -> Vec<Hit> {
        let inner = self.inner.borrow();
        let Some(compositor) = inner.graph.first_compositor() else {
            return Vec::new();
        };
        let mut hits = Vec::new();
        let layers = inner.graph.drawable_layers(compositor);
        for layer in layers.into_iter().rev() {
            let Some(scene) = inner.scene_of_layer(layer) else {
                continue;
            };
            let translation = match inner.graph.arena().get(layer).map(|r| &r.kind) {
                Some(ResourceKind::Layer(attrs)) => attrs.translation,
                _ => continue,
            };
            let ray = Ray::new(ray_origin - translation, ray_direction);
            let tester = HitTester::new(&inner.graph);
            hits.extend(tester.hit_test(scene, ray));
        }
        hits
    }

    /// Starts or stops continuous rendering.
    pub fn set_render_continuously(&self, render_continuously: bool) {
        self.scheduler.set_render_continuously(render_continuously);
    }

    /// Passes color-correction parameters through to the display.
    pub fn set_display_color_conversion(&self, transform: crate::display::ColorTransform) {
        self.display_manager
            .borrow_mut()
            .set_display_color_conversion(transform);
    }

    /// Aggregate frame statistics.
    #[must_use]
    pub fn stats_summary(&self) -> super::frame_stats::FrameStatsSummary {
        self.scheduler.stats_summary()
    }

    fn session_or_err(&self, session_id: SessionId) -> SessionResult<Rc<RefCell<Session>>> {
        self.session(session_id)
            .ok_or(SessionError::InvalidResourceId(0))
    }

    fn resolve_image_pipe(
        &self,
        session_id: SessionId,
        pipe_id: ResourceId,
    ) -> SessionResult<Rc<RefCell<crate::session::ImagePipe>>> {
        let session = self.session_or_err(session_id)?;
        let key = session.borrow().resolve(pipe_id)?;
        let inner = self.inner.borrow();
        match inner.graph.arena().get(key).map(|r| &r.kind) {
            Some(ResourceKind::ImagePipe(pipe)) => Ok(Rc::clone(pipe)),
            Some(_) => {
                let resource = inner
                    .graph
                    .arena()
                    .get(key)
                    .expect("resource must exist after its kind was matched");
                Err(SessionError::TypeMismatch {
                    id: pipe_id,
                    actual: resource.kind_name(),
                    expected: "ImagePipe",
                })
            }
            None => Err(SessionError::InvalidResourceId(pipe_id)),
        }
    }
}

impl EngineInner {
    fn kill_session_locked(&mut self, session_id: SessionId) {
        let Some(session) = self.session_manager.remove_session(session_id) else {
            return;
        };
        // Release fences of already-applied updates still unblock the
        // client; fences of never-applied updates die with the queue.
        for fence in session.borrow_mut().take_pending_release_fences() {
            if let Err(err) = self.release_signaller.add_cpu_release_fence(fence) {
                warn!("session {session_id}: failed to stage release fence at teardown: {err}");
            }
        }
        let resources = session.borrow_mut().take_resource_map();
        for (_, key) in resources {
            self.graph.release_ref(key);
        }
        self.flush_graph_output();
    }

    fn on_link_peer_closed(&mut self, koid: u64, side: LinkSide) {
        let actions = self.linker.on_peer_closed(koid, side);
        self.process_link_actions(actions);
        self.flush_graph_output();
    }

    fn process_link_actions(&mut self, actions: Vec<LinkAction>) {
        for action in actions {
            match action {
                LinkAction::Resolved {
                    export_object,
                    import_object,
                } => self.graph.resolve_view_link(export_object, import_object),
                LinkAction::Failed {
                    side: LinkSide::Export,
                    object,
                } => self.graph.view_holder_link_disconnected(object),
                LinkAction::Failed {
                    side: LinkSide::Import,
                    object,
                } => self.graph.view_link_disconnected(object),
            }
        }
    }

    // Deliver buffered graph events to their sessions and replay graph
    // side effects, looping until both queues run dry (effects can
    // cascade into more events and vice versa).
    fn flush_graph_output(&mut self) {
        loop {
            let events = self.graph.take_events();
            for (session_id, event) in &events {
                if let Some(session) = self.session_manager.find_session(*session_id) {
                    session.borrow_mut().enqueue_event(event.clone());
                }
            }
            let effects = self.graph.take_effects();
            if events.is_empty() && effects.is_empty() {
                return;
            }
            for effect in effects {
                self.handle_graph_effect(effect);
            }
        }
    }

    fn handle_graph_effect(&mut self, effect: GraphEffect) {
        match effect {
            GraphEffect::ViewHolderDestroyed { export_koid } => {
                let actions = self.linker.destroy(export_koid, LinkSide::Export);
                self.process_link_actions(actions);
            }
            GraphEffect::ViewDestroyed { import_koid } => {
                let actions = self.linker.destroy(import_koid, LinkSide::Import);
                self.process_link_actions(actions);
            }
            GraphEffect::ResetRenderEvent { holder } => self.arm_render_event(holder),
            GraphEffect::CloseRenderEvent { holder } => {
                let _ = self.render_watches.remove(&holder);
                self.graph.clear_view_render_event(holder);
            }
        }
    }

    // Arm the first-render event for a ViewHolder's current attach
    // cycle: the View signals the fence when its content first draws,
    // and the watch flips the holder's observed is_rendering state.
    fn arm_render_event(&mut self, holder: ObjectKey) {
        let fence = Fence::new();
        self.graph.arm_view_render_event(holder, fence.duplicate());
        let weak = self.weak_self.clone();
        let watch = fence.wait_async(&self.dispatcher, move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.borrow_mut();
                inner.graph.set_is_view_rendering(holder, true);
                // One signal per attach cycle; the event is done.
                let _ = inner.render_watches.remove(&holder);
                inner.graph.clear_view_render_event(holder);
                inner.flush_graph_output();
            }
        });
        let _ = self.render_watches.insert(holder, watch);
    }

    // Deliver MetricsChanged events for nodes whose global scale changed
    // since the last report.
    fn update_and_deliver_metrics(&mut self) {
        let mut subscribed = Vec::new();
        let compositors: Vec<ObjectKey> = self.graph.compositors().to_vec();
        for compositor in compositors {
            for layer in self.graph.drawable_layers(compositor) {
                let Some(scene) = self.scene_of_layer(layer) else {
                    continue;
                };
                let mut stack = vec![scene];
                while let Some(key) = stack.pop() {
                    let Some(resource) = self.graph.arena().get(key) else {
                        continue;
                    };
                    let Some(node) = resource.as_node() else { continue };
                    if resource.event_mask.contains(EventMask::METRICS) {
                        subscribed.push(key);
                    }
                    stack.extend(node.children.iter().chain(node.parts.iter()).copied());
                }
            }
        }

        for key in subscribed {
            let global = self.graph.global_transform(key);
            let metrics = Metrics::from_global_transform(&global);
            let mut changed = None;
            if let Some(resource) = self.graph.arena_mut().get_mut(key) {
                let (session_id, node_id) = (resource.session_id, resource.resource_id);
                if let Some(node) = resource.as_node_mut() {
                    if node.reported_metrics != Some(metrics) {
                        node.reported_metrics = Some(metrics);
                        changed = Some((session_id, node_id));
                    }
                }
            }
            if let Some((session_id, node_id)) = changed {
                self.graph.push_event(
                    session_id,
                    crate::session::SessionEvent::MetricsChanged { node_id, metrics },
                );
            }
        }
    }

    // Layer -> renderer -> camera -> scene resolution.
    fn scene_of_layer(&self, layer: ObjectKey) -> Option<ObjectKey> {
        let renderer = match self.graph.arena().get(layer).map(|r| &r.kind) {
            Some(ResourceKind::Layer(attrs)) => attrs.renderer?,
            _ => return None,
        };
        let camera = match self.graph.arena().get(renderer).map(|r| &r.kind) {
            Some(ResourceKind::Renderer(attrs)) => attrs.camera?,
            _ => return None,
        };
        match self.graph.arena().get(camera).map(|r| &r.kind) {
            Some(ResourceKind::Camera(attrs)) => Some(attrs.scene),
            _ => None,
        }
    }
}

impl SessionUpdater for EngineInner {
    /// Applies scheduled updates for each named session. A session whose
    /// update fails is killed; a session whose acquire fences are not
    /// ready is reported back for rescheduling.
    fn update_sessions(
        &mut self,
        sessions: Vec<SessionUpdate>,
        _frame_number: u64,
        presentation_time: Nanos,
        _presentation_interval: Nanos,
    ) -> UpdateResults {
        let mut results = UpdateResults::default();

        for update in sessions {
            let Some(session) = self.session_manager.find_session(update.session_id) else {
                // The session died after requesting the update. The scene
                // must be re-rendered to reflect its disappearance.
                results.needs_render = true;
                continue;
            };

            let mut link_actions = Vec::new();
            let apply_results = {
                let mut session = session.borrow_mut();
                let mut ctx = CommandContext {
                    graph: &mut self.graph,
                    linker: &mut self.linker,
                    release_signaller: &mut self.release_signaller,
                    dispatcher: &self.dispatcher,
                    link_peer_closed: &self.link_peer_closed,
                    link_actions: &mut link_actions,
                };
                session.apply_scheduled_updates(&mut ctx, presentation_time)
            };

            if apply_results.success {
                if !apply_results.all_fences_ready {
                    results.sessions_to_reschedule.push(SessionUpdate {
                        session_id: update.session_id,
                        requested_presentation_time: apply_results
                            .next_unready_time
                            .unwrap_or(update.requested_presentation_time),
                    });
                }
                self.callbacks_this_frame.extend(apply_results.callbacks);
                self.callbacks_this_frame
                    .extend(apply_results.image_pipe_callbacks);
                self.staged_uploads.extend(apply_results.staged_uploads);
            } else {
                if let Some(err) = &apply_results.error {
                    error!(
                        "session {}: update failed ({err}); killing session",
                        update.session_id
                    );
                }
                self.kill_session_locked(update.session_id);
            }

            if apply_results.needs_render {
                results.needs_render = true;
            }

            self.process_link_actions(link_actions);
            self.flush_graph_output();
        }

        results
    }

    fn signal_successful_present_callbacks(&mut self, info: PresentationInfo) {
        // Callbacks run on the dispatcher, never inline: a client
        // callback is free to present again immediately.
        for callback in self.pending_callbacks.drain(..) {
            self.dispatcher.post(move || callback(info));
        }
    }
}

impl FrameRenderer for EngineInner {
    fn render_frame(
        &mut self,
        timings: &Rc<FrameTimings>,
        presentation_time: Nanos,
        _presentation_interval: Nanos,
    ) -> bool {
        let _ = presentation_time;

        // This frame's callbacks ride with it from now on.
        let ratchet: Vec<PresentCallback> = self.callbacks_this_frame.drain(..).collect();
        self.pending_callbacks.extend(ratchet);

        self.update_and_deliver_metrics();
        self.flush_graph_output();

        let Some(compositor) = self.graph.first_compositor() else {
            return false;
        };
        if self.graph.compositors().len() > 1 {
            warn!("multiple compositors exist; only the primary is rendered");
        }
        let layers = self.graph.drawable_layers(compositor);
        if layers.is_empty() {
            return false;
        }
        let hla = HardwareLayerAssignment {
            items: smallvec![HardwareLayerItem {
                hardware_layer_id: 0,
                layers,
            }],
        };

        let uploads = std::mem::take(&mut self.staged_uploads);
        let mut rendered_views: Vec<ObjectKey> = Vec::new();
        {
            let EngineInner {
                graph,
                layer_renderer,
                swapchain,
                ..
            } = self;
            let Some(swapchain) = swapchain.as_ref() else {
                return false;
            };

            layer_renderer.upload_image_pipes(graph, &uploads);

            let draw_result = swapchain.draw_and_present_frame(
                timings,
                &hla,
                &mut |target, image, item, acquire, render_done| {
                    rendered_views.extend(layer_renderer.draw_layers(
                        graph,
                        target,
                        image,
                        item,
                        acquire,
                        render_done,
                    ));
                },
            );
            if let Err(err) = draw_result {
                error!("swapchain present failed: {err}");
                return false;
            }
        }

        // Views whose content reached the screen signal their
        // first-render events.
        for view in rendered_views {
            if let Some(fence) = self.graph.take_view_render_handle(view) {
                fence.signal();
            }
        }

        true
    }
}
