//! Renderer-facing seams.
//!
//! The GPU is an external collaborator: the engine hands it a frame's
//! worth of layer content and semaphores, and the renderer does "some
//! rendering". Concrete implementations live outside the core; tests
//! install recording fakes.

use std::rc::Rc;

use crate::dispatch::Nanos;
use crate::scene::{ObjectKey, SceneGraph};
use crate::swapchain::{FramebufferImage, HardwareLayerItem};
use crate::sync::GpuSemaphore;

use super::frame_timings::FrameTimings;

/// The scheduler-facing side of rendering: commits to producing a frame.
pub trait FrameRenderer {
    /// Renders a frame aimed at `presentation_time`. Returning `true`
    /// commits to reporting through `timings`; `false` means nothing was
    /// drawn and the frame is abandoned without error.
    fn render_frame(
        &mut self,
        timings: &Rc<FrameTimings>,
        presentation_time: Nanos,
        presentation_interval: Nanos,
    ) -> bool;
}

/// Draws compositor layers into swapchain images.
pub trait LayerRenderer {
    /// Uploads the latest latched image of each listed pipe. Called at
    /// most once per pipe per frame.
    fn upload_image_pipes(&mut self, graph: &SceneGraph, pipes: &[ObjectKey]);

    /// Draws one hardware-layer item into `output`.
    ///
    /// `acquire` (if any) must be waited on before the GPU touches
    /// `output`; `render_done` (if any) must be signalled once all work
    /// for the frame is submitted. Returns the View resources whose
    /// content contributed draw calls, for render-state signalling.
    fn draw_layers(
        &mut self,
        graph: &SceneGraph,
        target_presentation_time: Nanos,
        output: &FramebufferImage,
        item: &HardwareLayerItem,
        acquire: Option<&GpuSemaphore>,
        render_done: Option<&GpuSemaphore>,
    ) -> Vec<ObjectKey>;
}
