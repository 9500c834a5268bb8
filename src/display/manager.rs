//! Display manager: driver glue and vsync fan-out.

use std::rc::Rc;

use log::{error, warn};

use crate::dispatch::Nanos;
use crate::errors::{PrismError, Result};
use crate::sync::Fence;

use super::{Display, PixelFormat};

/// Id value the driver uses for "no such object".
pub const INVALID_DISPLAY_ID: u64 = 0;

/// Description of a display reported by the driver.
#[derive(Debug, Clone)]
pub struct DisplayInfo {
    /// Driver-assigned display id.
    pub id: u64,
    /// Horizontal resolution of the preferred mode, in pixels.
    pub width_px: u32,
    /// Vertical resolution of the preferred mode, in pixels.
    pub height_px: u32,
    /// Supported pixel formats in priority order.
    pub pixel_formats: Vec<PixelFormat>,
}

/// Primary-layer image configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageConfig {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Pixel format of imported images.
    pub pixel_format: PixelFormat,
    /// Driver-specific tiling type (e.g. linear vs. X-tiled).
    pub tiling_type: u32,
}

/// Color-correction parameters, passed through to the display untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorTransform {
    /// Per-channel offsets applied before the matrix.
    pub preoffsets: [f32; 3],
    /// 3x3 color matrix, row-major.
    pub matrix: [f32; 9],
    /// Per-channel offsets applied after the matrix.
    pub postoffsets: [f32; 3],
}

impl Default for ColorTransform {
    fn default() -> Self {
        Self {
            preoffsets: [0.0; 3],
            matrix: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            postoffsets: [0.0; 3],
        }
    }
}

/// Callback invoked on every vsync of the default display, with the
/// timestamp and the image ids currently in flight on the controller.
pub type VsyncCallback = Box<dyn FnMut(Nanos, &[u64])>;

/// The raw display-driver capability set the core depends on.
///
/// A concrete implementation speaks to real hardware; tests install a
/// fake. All ids are driver-scoped; `0` means invalid.
pub trait DisplayController {
    /// Creates a hardware layer, returning its id.
    fn create_layer(&mut self) -> Result<u64>;

    /// Assigns the ordered set of layers composed onto a display.
    fn set_display_layers(&mut self, display_id: u64, layer_ids: &[u64]) -> Result<()>;

    /// Configures the primary image geometry of a layer.
    fn set_layer_primary_config(&mut self, layer_id: u64, config: ImageConfig) -> Result<()>;

    /// Imports a CPU event for driver-side waiting/signalling. The driver
    /// keeps its duplicate of the fence handle.
    fn import_event(&mut self, event: Fence, event_id: u64) -> Result<()>;

    /// Releases a previously imported event id.
    fn release_event(&mut self, event_id: u64);

    /// Allocates a buffer collection shared with the display, returning
    /// its id.
    fn import_buffer_collection(&mut self) -> Result<u64>;

    /// Releases a buffer collection.
    fn release_buffer_collection(&mut self, collection_id: u64);

    /// Imports image `index` of a collection, returning a driver image id.
    fn import_image(&mut self, config: ImageConfig, collection_id: u64, index: u32) -> Result<u64>;

    /// Releases an imported image.
    fn release_image(&mut self, image_id: u64);

    /// Stages `image_id` onto `layer_id`: scan-out begins once
    /// `render_done_event_id` signals, and `retired_event_id` is signalled
    /// by the driver when the image leaves the screen.
    fn set_layer_image(
        &mut self,
        layer_id: u64,
        image_id: u64,
        render_done_event_id: u64,
        retired_event_id: u64,
    ) -> Result<()>;

    /// Applies all staged configuration changes atomically.
    fn apply_config(&mut self) -> Result<()>;

    /// Pushes color-correction parameters to the display.
    fn set_color_correction(&mut self, display_id: u64, transform: ColorTransform);

    /// Enables or disables vsync event delivery.
    fn enable_vsync(&mut self, enable: bool) -> Result<()>;
}

/// Owns the connection to the display driver and the default [`Display`].
///
/// Responsibilities:
/// - waiting for the first display to arrive and configuring its primary
///   layer,
/// - allocating driver event ids for imported fences,
/// - flipping framebuffers (`set_layer_image` + `apply_config`),
/// - filtering driver vsync to the default display and fanning it out to
///   the registered callback,
/// - tracking display ownership for multi-client displays.
pub struct DisplayManager {
    controller: Box<dyn DisplayController>,
    default_display: Option<Rc<Display>>,
    display_available_cb: Option<Box<dyn FnOnce()>>,
    vsync_cb: Option<VsyncCallback>,
    layer_id: u64,
    image_config: Option<ImageConfig>,
    next_event_id: u64,
    owns_display_controller: bool,
    display_lost: bool,
}

impl DisplayManager {
    /// Creates a manager over a driver connection.
    #[must_use]
    pub fn new(controller: Box<dyn DisplayController>) -> Self {
        Self {
            controller,
            default_display: None,
            display_available_cb: None,
            vsync_cb: None,
            layer_id: 0,
            image_config: None,
            next_event_id: 1,
            owns_display_controller: false,
            display_lost: false,
        }
    }

    /// Registers `callback` to run once the default display is configured.
    pub fn wait_for_default_display(&mut self, callback: impl FnOnce() + 'static) {
        debug_assert!(self.default_display.is_none());
        self.display_available_cb = Some(Box::new(callback));
    }

    /// The default display, once one has arrived.
    #[must_use]
    pub fn default_display(&self) -> Option<&Rc<Display>> {
        self.default_display.as_ref()
    }

    /// Returns `true` once the default display has been removed or its
    /// driver connection lost. Frame scheduling stops at that point.
    #[must_use]
    pub fn is_display_lost(&self) -> bool {
        self.display_lost
    }

    /// Driver callback: displays were added or removed.
    ///
    /// The first added display becomes the default: a hardware layer is
    /// created and assigned to it. Removal of the default display marks
    /// the manager lost; other removals are ignored.
    pub fn displays_changed(&mut self, added: Vec<DisplayInfo>, removed: Vec<u64>) -> Result<()> {
        if let Some(default) = &self.default_display {
            if removed.contains(&default.id()) {
                error!("default display {} disconnected", default.id());
                self.display_lost = true;
                self.vsync_cb = None;
            }
            return Ok(());
        }

        let Some(info) = added.into_iter().next() else {
            return Ok(());
        };

        self.layer_id = self.controller.create_layer()?;
        self.controller.set_display_layers(info.id, &[self.layer_id])?;

        let display = Rc::new(Display::new(
            info.id,
            info.width_px,
            info.height_px,
            info.pixel_formats,
        ));
        display.set_owned(self.owns_display_controller);
        self.default_display = Some(display);

        if let Some(callback) = self.display_available_cb.take() {
            callback();
        }
        Ok(())
    }

    /// Driver callback: this client gained or lost display ownership.
    pub fn client_ownership_change(&mut self, has_ownership: bool) {
        self.owns_display_controller = has_ownership;
        if let Some(display) = &self.default_display {
            display.set_owned(has_ownership);
        }
    }

    /// Driver callback: a vsync occurred on `display_id`.
    ///
    /// Timing is recorded on the default display; the swapchain callback
    /// fires only for the default display's vsyncs.
    pub fn vsync(&mut self, display_id: u64, timestamp: Nanos, in_flight_image_ids: &[u64]) {
        let Some(display) = &self.default_display else {
            return;
        };
        if display.id() != display_id {
            return;
        }
        display.on_vsync(timestamp);
        if let Some(cb) = &mut self.vsync_cb {
            cb(timestamp, in_flight_image_ids);
        }
    }

    /// Sets the primary-layer image configuration used for subsequent
    /// image imports.
    pub fn set_image_config(&mut self, width: u32, height: u32, pixel_format: PixelFormat) -> Result<()> {
        let config = ImageConfig {
            width,
            height,
            pixel_format,
            tiling_type: 0,
        };
        self.image_config = Some(config);
        self.controller.set_layer_primary_config(self.layer_id, config)
    }

    /// Imports a fence into the driver, returning the allocated event id.
    ///
    /// The driver receives its own duplicate of the handle.
    pub fn import_event(&mut self, event: &Fence) -> Result<u64> {
        let event_id = self.next_event_id;
        self.next_event_id += 1;
        self.controller.import_event(event.duplicate(), event_id)?;
        Ok(event_id)
    }

    /// Releases a previously imported event id. The driver has captured
    /// what it needs by the time this is called.
    pub fn release_event(&mut self, event_id: u64) {
        self.controller.release_event(event_id);
    }

    /// Allocates and constrains a buffer collection for framebuffers.
    pub fn import_buffer_collection(&mut self) -> Result<u64> {
        self.controller.import_buffer_collection()
    }

    /// Releases a buffer collection.
    pub fn release_buffer_collection(&mut self, collection_id: u64) {
        self.controller.release_buffer_collection(collection_id);
    }

    /// Imports image `index` of `collection_id` with the current image
    /// config.
    pub fn import_image(&mut self, collection_id: u64, index: u32) -> Result<u64> {
        let config = self
            .image_config
            .ok_or_else(|| PrismError::DisplayImportFailed("image config not set".to_owned()))?;
        self.controller.import_image(config, collection_id, index)
    }

    /// Releases an imported image.
    pub fn release_image(&mut self, image_id: u64) {
        self.controller.release_image(image_id);
    }

    /// Flips the display to `image_id`: scan-out waits on
    /// `render_done_event_id` and the driver signals `retired_event_id`
    /// when the image is no longer being scanned out.
    pub fn flip(
        &mut self,
        image_id: u64,
        render_done_event_id: u64,
        retired_event_id: u64,
    ) -> Result<()> {
        self.controller
            .set_layer_image(self.layer_id, image_id, render_done_event_id, retired_event_id)?;
        self.controller.apply_config()
    }

    /// Passes color-correction parameters through to the display.
    pub fn set_display_color_conversion(&mut self, transform: ColorTransform) {
        if let Some(display) = &self.default_display {
            self.controller.set_color_correction(display.id(), transform);
        } else {
            warn!("color conversion set before a display was available");
        }
    }

    /// Registers (or clears) the vsync callback and toggles driver vsync
    /// delivery to match.
    pub fn enable_vsync(&mut self, callback: Option<VsyncCallback>) -> Result<()> {
        let enable = callback.is_some();
        self.vsync_cb = callback;
        self.controller.enable_vsync(enable)
    }
}
