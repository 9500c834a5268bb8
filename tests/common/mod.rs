//! Shared fakes and fixtures for the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use prism::dispatch::{Dispatcher, Nanos};
use prism::display::{
    ColorTransform, DisplayController, DisplayInfo, DisplayManager, ImageConfig, PixelFormat,
};
use prism::engine::{Engine, LayerRenderer};
use prism::errors::Result;
use prism::scene::ObjectKey;
use prism::session::command::{Command, ResourceSpec};
use prism::session::{PresentationInfo, Session};
use prism::settings::CompositorSettings;
use prism::swapchain::{FramebufferImage, HardwareLayerItem};
use prism::sync::{CommandBufferSequencer, Fence, GpuSemaphore};
use prism::SceneGraph;

pub const VSYNC: Nanos = 16_666_667;

// ============================================================================
// Fake display controller
// ============================================================================

/// One staged flip captured by the fake controller. The fences are the
/// driver's duplicates, captured at `set_layer_image` time.
#[derive(Clone)]
pub struct Flip {
    pub image_id: u64,
    pub render_done: Fence,
    pub retired: Fence,
}

#[derive(Default)]
pub struct ControllerState {
    next_id: u64,
    pub events: FxHashMap<u64, Fence>,
    pub layers: Vec<u64>,
    pub images: Vec<u64>,
    pub released_images: Vec<u64>,
    pub released_events: Vec<u64>,
    pub collections: Vec<u64>,
    pub flips: Vec<Flip>,
    pub applied_configs: usize,
    pub vsync_enabled: bool,
    pub color_transforms: Vec<ColorTransform>,
}

pub struct FakeDisplayController {
    state: Rc<RefCell<ControllerState>>,
}

#[derive(Clone)]
pub struct ControllerHandle(pub Rc<RefCell<ControllerState>>);

impl ControllerHandle {
    pub fn last_flip(&self) -> Option<Flip> {
        self.0.borrow().flips.last().cloned()
    }

    pub fn flip_count(&self) -> usize {
        self.0.borrow().flips.len()
    }

    pub fn vsync_enabled(&self) -> bool {
        self.0.borrow().vsync_enabled
    }
}

impl FakeDisplayController {
    pub fn new() -> (Self, ControllerHandle) {
        let state = Rc::new(RefCell::new(ControllerState::default()));
        (
            Self {
                state: Rc::clone(&state),
            },
            ControllerHandle(state),
        )
    }

    fn next_id(&self) -> u64 {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        state.next_id
    }
}

impl DisplayController for FakeDisplayController {
    fn create_layer(&mut self) -> Result<u64> {
        let id = self.next_id();
        self.state.borrow_mut().layers.push(id);
        Ok(id)
    }

    fn set_display_layers(&mut self, _display_id: u64, _layer_ids: &[u64]) -> Result<()> {
        Ok(())
    }

    fn set_layer_primary_config(&mut self, _layer_id: u64, _config: ImageConfig) -> Result<()> {
        Ok(())
    }

    fn import_event(&mut self, event: Fence, event_id: u64) -> Result<()> {
        let existing = self.state.borrow_mut().events.insert(event_id, event);
        assert!(existing.is_none());
        Ok(())
    }

    fn release_event(&mut self, event_id: u64) {
        let mut state = self.state.borrow_mut();
        let _ = state.events.remove(&event_id);
        state.released_events.push(event_id);
    }

    fn import_buffer_collection(&mut self) -> Result<u64> {
        let id = self.next_id();
        self.state.borrow_mut().collections.push(id);
        Ok(id)
    }

    fn release_buffer_collection(&mut self, _collection_id: u64) {}

    fn import_image(
        &mut self,
        _config: ImageConfig,
        _collection_id: u64,
        _index: u32,
    ) -> Result<u64> {
        let id = self.next_id();
        self.state.borrow_mut().images.push(id);
        Ok(id)
    }

    fn release_image(&mut self, image_id: u64) {
        self.state.borrow_mut().released_images.push(image_id);
    }

    fn set_layer_image(
        &mut self,
        _layer_id: u64,
        image_id: u64,
        render_done_event_id: u64,
        retired_event_id: u64,
    ) -> Result<()> {
        let mut state = self.state.borrow_mut();
        // The driver captures the event handles at flip time; releasing
        // the imported ids later must not affect them.
        let render_done = state.events[&render_done_event_id].duplicate();
        let retired = state.events[&retired_event_id].duplicate();
        state.flips.push(Flip {
            image_id,
            render_done,
            retired,
        });
        Ok(())
    }

    fn apply_config(&mut self) -> Result<()> {
        self.state.borrow_mut().applied_configs += 1;
        Ok(())
    }

    fn set_color_correction(&mut self, _display_id: u64, transform: ColorTransform) {
        self.state.borrow_mut().color_transforms.push(transform);
    }

    fn enable_vsync(&mut self, enable: bool) -> Result<()> {
        self.state.borrow_mut().vsync_enabled = enable;
        Ok(())
    }
}

/// Builds a display manager whose default 1024x600 display has arrived.
pub fn new_display_manager() -> (Rc<RefCell<DisplayManager>>, ControllerHandle) {
    let (controller, handle) = FakeDisplayController::new();
    let mut manager = DisplayManager::new(Box::new(controller));
    manager.wait_for_default_display(|| {});
    manager
        .displays_changed(
            vec![DisplayInfo {
                id: 1,
                width_px: 1024,
                height_px: 600,
                pixel_formats: vec![PixelFormat::Argb8888],
            }],
            Vec::new(),
        )
        .expect("display setup");
    (Rc::new(RefCell::new(manager)), handle)
}

// ============================================================================
// Fake layer renderer
// ============================================================================

pub struct DrawRecord {
    pub target_presentation_time: Nanos,
    pub image: FramebufferImage,
    pub layers: Vec<ObjectKey>,
    pub had_render_done: bool,
}

#[derive(Default)]
pub struct RendererState {
    pub draws: Vec<DrawRecord>,
    pub uploads: Vec<Vec<ObjectKey>>,
    /// Signal the render-done semaphore's fence as soon as drawing is
    /// submitted (an instantaneous GPU).
    pub auto_signal_render_done: bool,
    /// View keys reported as having contributed draw calls.
    pub views_to_report: Vec<ObjectKey>,
    /// When set, one command buffer is "submitted" per draw.
    pub sequencer: Option<CommandBufferSequencer>,
}

#[derive(Clone)]
pub struct RendererHandle(pub Rc<RefCell<RendererState>>);

impl RendererHandle {
    pub fn draw_count(&self) -> usize {
        self.0.borrow().draws.len()
    }

    pub fn set_views_to_report(&self, views: Vec<ObjectKey>) {
        self.0.borrow_mut().views_to_report = views;
    }
}

pub struct FakeLayerRenderer {
    state: Rc<RefCell<RendererState>>,
}

impl FakeLayerRenderer {
    pub fn new() -> (Self, RendererHandle) {
        let state = Rc::new(RefCell::new(RendererState {
            auto_signal_render_done: true,
            ..RendererState::default()
        }));
        (
            Self {
                state: Rc::clone(&state),
            },
            RendererHandle(state),
        )
    }
}

impl LayerRenderer for FakeLayerRenderer {
    fn upload_image_pipes(&mut self, _graph: &SceneGraph, pipes: &[ObjectKey]) {
        self.state.borrow_mut().uploads.push(pipes.to_vec());
    }

    fn draw_layers(
        &mut self,
        _graph: &SceneGraph,
        target_presentation_time: Nanos,
        output: &FramebufferImage,
        item: &HardwareLayerItem,
        _acquire: Option<&GpuSemaphore>,
        render_done: Option<&GpuSemaphore>,
    ) -> Vec<ObjectKey> {
        let mut state = self.state.borrow_mut();
        if let Some(sequencer) = &state.sequencer {
            let _ = sequencer.generate_next();
        }
        state.draws.push(DrawRecord {
            target_presentation_time,
            image: *output,
            layers: item.layers.clone(),
            had_render_done: render_done.is_some(),
        });
        if state.auto_signal_render_done {
            if let Some(render_done) = render_done {
                render_done.fence().signal();
            }
        }
        state.views_to_report.clone()
    }
}

// ============================================================================
// Engine fixture
// ============================================================================

pub struct TestEngine {
    pub dispatcher: Dispatcher,
    pub engine: Engine,
    pub controller: ControllerHandle,
    pub renderer: RendererHandle,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_settings(&CompositorSettings::default())
    }

    pub fn with_settings(settings: &CompositorSettings) -> Self {
        let dispatcher = Dispatcher::new_manual();
        let (manager, controller) = new_display_manager();
        let (renderer, renderer_handle) = FakeLayerRenderer::new();
        let engine = Engine::new(
            dispatcher.clone(),
            manager,
            Box::new(renderer),
            settings,
        )
        .expect("engine setup");
        Self {
            dispatcher,
            engine,
            controller,
            renderer: renderer_handle,
        }
    }

    /// Creates a session that owns the display compositor and a minimal
    /// drawable scene, presented at time 0.
    pub fn new_root_session(&self) -> (Rc<RefCell<Session>>, RootIds) {
        let session = self.engine.create_session();
        let ids = RootIds::default();
        session.borrow_mut().enqueue(vec![
            Command::CreateResource {
                id: ids.compositor,
                spec: ResourceSpec::DisplayCompositor,
            },
            Command::CreateResource {
                id: ids.layer_stack,
                spec: ResourceSpec::LayerStack,
            },
            Command::CreateResource {
                id: ids.layer,
                spec: ResourceSpec::Layer,
            },
            Command::CreateResource {
                id: ids.renderer,
                spec: ResourceSpec::Renderer,
            },
            Command::CreateResource {
                id: ids.scene,
                spec: ResourceSpec::Scene,
            },
            Command::CreateResource {
                id: ids.camera,
                spec: ResourceSpec::Camera { scene_id: ids.scene },
            },
            Command::SetCamera {
                renderer_id: ids.renderer,
                camera_id: ids.camera,
            },
            Command::SetRenderer {
                layer_id: ids.layer,
                renderer_id: ids.renderer,
            },
            Command::SetSize {
                layer_id: ids.layer,
                size: glam::Vec2::new(1024.0, 600.0),
            },
            Command::AddLayer {
                layer_stack_id: ids.layer_stack,
                layer_id: ids.layer,
            },
            Command::SetLayerStack {
                compositor_id: ids.compositor,
                layer_stack_id: ids.layer_stack,
            },
        ]);
        session
            .borrow_mut()
            .present(0, Vec::new(), Vec::new(), Box::new(|_| {}))
            .expect("root present");
        (session, ids)
    }

    /// Runs the dispatcher forward one vsync interval, which fires any
    /// due frame wakeup (and the render that follows).
    pub fn pump(&self) {
        self.dispatcher.advance_by(VSYNC);
    }

    /// Delivers a vsync for the most recent flip, if any, finalizing the
    /// frame it belongs to.
    pub fn deliver_vsync(&self) {
        if let Some(flip) = self.controller.last_flip() {
            let now = self.dispatcher.now();
            self.engine
                .display_manager()
                .borrow_mut()
                .vsync(1, now, &[flip.image_id]);
        }
        self.dispatcher.run_until_idle();
    }

    /// Runs several wakeup/vsync rounds so that every queued update has
    /// applied and every rendered frame has been presented, regardless
    /// of where in the frame cadence the caller currently is.
    pub fn run_frame(&self) {
        for _ in 0..3 {
            self.pump();
            self.deliver_vsync();
        }
    }
}

/// Resource ids used by the root session fixture.
pub struct RootIds {
    pub compositor: u32,
    pub layer_stack: u32,
    pub layer: u32,
    pub renderer: u32,
    pub scene: u32,
    pub camera: u32,
}

impl Default for RootIds {
    fn default() -> Self {
        Self {
            compositor: 1,
            layer_stack: 2,
            layer: 3,
            renderer: 4,
            scene: 5,
            camera: 6,
        }
    }
}

/// Collects present-callback invocations for assertions.
pub fn recording_callback() -> (
    Box<dyn FnOnce(PresentationInfo)>,
    Rc<RefCell<Option<PresentationInfo>>>,
) {
    let slot: Rc<RefCell<Option<PresentationInfo>>> = Rc::new(RefCell::new(None));
    let writer = Rc::clone(&slot);
    (
        Box::new(move |info| {
            *writer.borrow_mut() = Some(info);
        }),
        slot,
    )
}
