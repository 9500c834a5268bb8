//! Display Swapchain
//!
//! Owns a small ring of display-format framebuffer images, manages
//! per-frame render/present state, and translates driver vsync signals
//! into per-frame presented/dropped decisions for [`FrameTimings`].
//!
//! # Why three buffers
//!
//! With an asynchronous render/present pipeline, two buffers can tear: if
//! frame A's target slips by one vsync, a subsequently scheduled frame B
//! also slips, and the next render into A's buffer begins while A is
//! still on screen. A third buffer decouples "currently on screen" from
//! "about to be rendered", at the cost of one extra frame of worst-case
//! latency. The ring size is configurable; any `N >= 2` is accepted with
//! that trade-off.

use std::cell::RefCell;
use std::rc::Rc;

use log::{error, warn};
use smallvec::SmallVec;

use crate::dispatch::{Dispatcher, Nanos};
use crate::display::{Display, DisplayManager, PixelFormat};
use crate::engine::frame_timings::{FrameTimings, TIME_DROPPED};
use crate::errors::Result;
use crate::scene::ObjectKey;
use crate::sync::{Fence, FenceWatch, GpuSemaphore};

/// Default ring size.
pub const DEFAULT_SWAPCHAIN_IMAGE_COUNT: usize = 3;

/// A framebuffer image owned by the swapchain. Opaque to the core beyond
/// its driver id and geometry; the renderer knows what to do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferImage {
    /// Driver image id, as returned by the display import.
    pub image_id: u64,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format the image was imported with.
    pub format: PixelFormat,
}

/// One hardware layer's worth of work for a frame: the driver layer it
/// lands on and the compositor layers composed into it.
#[derive(Debug, Clone)]
pub struct HardwareLayerItem {
    /// Driver hardware-layer id.
    pub hardware_layer_id: u64,
    /// The compositor layer resources drawn into this hardware layer,
    /// bottom to top.
    pub layers: Vec<ObjectKey>,
}

/// Mapping from compositor layers to the display controller's hardware
/// layers for one frame. Exactly one item in the current design; the
/// structure permits more.
#[derive(Debug, Clone, Default)]
pub struct HardwareLayerAssignment {
    /// Per-hardware-layer work items.
    pub items: SmallVec<[HardwareLayerItem; 1]>,
}

/// Per-layer draw callback invoked by
/// [`DisplaySwapchain::draw_and_present_frame`].
///
/// Arguments: target presentation time, destination image, the hardware
/// layer item to draw, an optional acquire semaphore the GPU must wait
/// on, and an optional render-done semaphore to signal (provided only for
/// the final layer — one semaphore suffices to order the whole frame).
pub type DrawCallback<'a> = dyn FnMut(
        Nanos,
        &FramebufferImage,
        &HardwareLayerItem,
        Option<&GpuSemaphore>,
        Option<&GpuSemaphore>,
    ) + 'a;

struct Framebuffer {
    collection_id: u64,
    image: FramebufferImage,
}

struct FrameRecord {
    frame_timings: Rc<FrameTimings>,
    swapchain_index: usize,
    render_finished_semaphore: GpuSemaphore,
    render_finished_event_id: u64,
    retired_event: Fence,
    retired_event_id: u64,
    render_finished_watch: FenceWatch,
    presented: bool,
}

struct Inner {
    dispatcher: Dispatcher,
    display_manager: Rc<RefCell<DisplayManager>>,
    display: Rc<Display>,
    image_count: usize,
    framebuffers: Vec<Framebuffer>,
    frames: Vec<Option<FrameRecord>>,
    next_frame_index: usize,
    presented_frame_index: usize,
    outstanding_frame_count: usize,
}

/// The ring of framebuffers between the renderer and the display.
///
/// Construction claims the display, imports `image_count` framebuffer
/// images, and enables vsync delivery; drop tears all of that down,
/// synthesizing dropped results for any frame still in flight.
pub struct DisplaySwapchain {
    inner: Rc<RefCell<Inner>>,
}

impl DisplaySwapchain {
    /// Creates a swapchain over the default display.
    ///
    /// # Errors
    ///
    /// Fails if the display is already claimed or the driver rejects an
    /// import.
    pub fn new(
        dispatcher: Dispatcher,
        display_manager: &Rc<RefCell<DisplayManager>>,
        display: Rc<Display>,
        image_count: usize,
    ) -> Result<Self> {
        debug_assert!(image_count >= 2, "a swapchain needs at least two buffers");
        display.claim()?;

        let format = display
            .preferred_pixel_format()
            .unwrap_or(PixelFormat::Argb8888);
        let (width, height) = (display.width_px(), display.height_px());

        let mut framebuffers = Vec::with_capacity(image_count);
        {
            let mut manager = display_manager.borrow_mut();
            manager.set_image_config(width, height, format)?;
            for _ in 0..image_count {
                let collection_id = manager.import_buffer_collection()?;
                let image_id = manager.import_image(collection_id, 0)?;
                framebuffers.push(Framebuffer {
                    collection_id,
                    image: FramebufferImage {
                        image_id,
                        width,
                        height,
                        format,
                    },
                });
            }
        }

        let inner = Rc::new(RefCell::new(Inner {
            dispatcher,
            display_manager: Rc::clone(display_manager),
            display,
            image_count,
            framebuffers,
            frames: (0..image_count).map(|_| None).collect(),
            next_frame_index: 0,
            presented_frame_index: 0,
            outstanding_frame_count: 0,
        }));

        {
            let weak = Rc::downgrade(&inner);
            let mut manager = display_manager.borrow_mut();
            manager.enable_vsync(Some(Box::new(move |timestamp, image_ids| {
                if let Some(inner) = weak.upgrade() {
                    Self::on_vsync(&inner, timestamp, image_ids);
                }
            })))?;
        }

        Ok(Self { inner })
    }

    /// The display this swapchain renders to.
    #[must_use]
    pub fn display(&self) -> Rc<Display> {
        Rc::clone(&self.inner.borrow().display)
    }

    /// Number of frames rendered (or rendering) but not yet scanned past.
    #[must_use]
    pub fn outstanding_frame_count(&self) -> usize {
        self.inner.borrow().outstanding_frame_count
    }

    /// Renders into the next free backbuffer and flips the display to it.
    ///
    /// Invokes `draw_callback` once per hardware-layer item, handing the
    /// render-done semaphore only to the final one, then stages the flip
    /// with the imported render-done and retired events. The driver
    /// captures the event handles during the flip, so the imported ids
    /// are released immediately after.
    pub fn draw_and_present_frame(
        &self,
        frame_timings: &Rc<FrameTimings>,
        hla: &HardwareLayerAssignment,
        draw_callback: &mut DrawCallback<'_>,
    ) -> Result<()> {
        let (image, semaphore, image_id, render_finished_event_id, retired_event_id) = {
            let mut inner = self.inner.borrow_mut();
            let frame_index = inner.next_frame_index;

            // The slot's previous record must already be finalized; if the
            // driver has not yet retired its buffer we are rendering into
            // an in-use backbuffer, which shows up as tearing.
            if let Some(previous) = &inner.frames[frame_index] {
                debug_assert!(previous.frame_timings.finalized());
                if !previous.retired_event.is_signalled() {
                    warn!("rendering into in-use backbuffer (slot {frame_index})");
                }
            }

            let semaphore = GpuSemaphore::new();
            let render_finished_event = semaphore.fence().duplicate();
            let retired_event = Fence::new();
            let (render_finished_event_id, retired_event_id) = {
                let mut manager = inner.display_manager.borrow_mut();
                (
                    manager.import_event(&render_finished_event)?,
                    manager.import_event(&retired_event)?,
                )
            };

            let swapchain_index = frame_timings.register_swapchain();
            let dispatcher = inner.dispatcher.clone();
            let watch = {
                let weak = Rc::downgrade(&self.inner);
                let timestamper = dispatcher.clone();
                render_finished_event.wait_async(&dispatcher, move || {
                    if let Some(inner) = weak.upgrade() {
                        Self::on_frame_rendered(&inner, frame_index, timestamper.now());
                    }
                })
            };

            inner.frames[frame_index] = Some(FrameRecord {
                frame_timings: Rc::clone(frame_timings),
                swapchain_index,
                render_finished_semaphore: semaphore,
                render_finished_event_id,
                retired_event,
                retired_event_id,
                render_finished_watch: watch,
                presented: false,
            });

            inner.next_frame_index = (frame_index + 1) % inner.image_count;
            inner.outstanding_frame_count += 1;

            let record = inner.frames[frame_index]
                .as_ref()
                .expect("frame record must exist after being installed in its slot");
            (
                inner.framebuffers[frame_index].image,
                record.render_finished_semaphore.clone(),
                inner.framebuffers[frame_index].image.image_id,
                record.render_finished_event_id,
                record.retired_event_id,
            )
        };

        let num_hardware_layers = hla.items.len();
        debug_assert_eq!(num_hardware_layers, 1, "only one hardware layer is driven");
        for (i, item) in hla.items.iter().enumerate() {
            // A single semaphore is sufficient to order all layer work, so
            // only the final layer's draw gets it.
            let render_done = (i + 1 == num_hardware_layers).then_some(&semaphore);
            draw_callback(
                frame_timings.target_presentation_time(),
                &image,
                item,
                None,
                render_done,
            );
        }

        let manager = Rc::clone(&self.inner.borrow().display_manager);
        let mut manager = manager.borrow_mut();
        manager.flip(image_id, render_finished_event_id, retired_event_id)?;
        manager.release_event(render_finished_event_id);
        manager.release_event(retired_event_id);

        Ok(())
    }

    fn on_frame_rendered(inner: &Rc<RefCell<Inner>>, frame_index: usize, timestamp: Nanos) {
        let (timings, swapchain_index) = {
            let inner = inner.borrow();
            let Some(record) = &inner.frames[frame_index] else {
                return;
            };
            (Rc::clone(&record.frame_timings), record.swapchain_index)
        };
        timings.on_frame_rendered(swapchain_index, timestamp);
    }

    /// Driver vsync: walk forward from the currently displayed slot,
    /// marking the first record whose image matches as presented and
    /// everything scanned past without matching as dropped once.
    ///
    /// Retaining the currently displayed slot distinguishes "one frame
    /// shown twice" from "one frame dropped" without speculative
    /// look-ahead; the slot only advances once the controller has visibly
    /// moved on to a different image.
    fn on_vsync(inner: &Rc<RefCell<Inner>>, timestamp: Nanos, image_ids: &[u64]) {
        if image_ids.is_empty() {
            return;
        }
        debug_assert_eq!(image_ids.len(), 1, "only one hardware layer is driven");
        let image_id = image_ids[0];

        // Collect notifications first, deliver after releasing the borrow:
        // finalization re-enters the scheduler.
        let mut presented: Vec<(Rc<FrameTimings>, usize, bool)> = Vec::new();
        let mut matched = false;
        let had_outstanding = {
            let mut inner = inner.borrow_mut();
            let had_outstanding = inner.outstanding_frame_count > 0;
            while inner.outstanding_frame_count > 0 && !matched {
                let idx = inner.presented_frame_index;
                matched = inner.framebuffers[idx].image.image_id == image_id;
                if let Some(record) = inner.frames[idx].as_mut() {
                    // Don't double-report a frame shown twice because its
                    // successor missed the deadline.
                    if !record.presented {
                        record.presented = true;
                        presented.push((
                            Rc::clone(&record.frame_timings),
                            record.swapchain_index,
                            matched,
                        ));
                    }
                }
                if !matched {
                    inner.presented_frame_index = (idx + 1) % inner.image_count;
                    inner.outstanding_frame_count -= 1;
                }
            }
            had_outstanding
        };

        for (timings, swapchain_index, was_match) in presented {
            if was_match {
                timings.on_frame_presented(swapchain_index, timestamp);
            } else {
                timings.on_frame_dropped(swapchain_index);
            }
        }

        if had_outstanding && !matched {
            error!("unhandled vsync for image id {image_id}");
            debug_assert!(matched, "unhandled vsync");
        }
    }
}

impl Drop for DisplaySwapchain {
    fn drop(&mut self) {
        // Turn off vsync delivery first; nothing below should re-enter.
        {
            let manager = Rc::clone(&self.inner.borrow().display_manager);
            if manager.borrow_mut().enable_vsync(None).is_err() {
                warn!("failed to disable vsync during swapchain teardown");
            }
        }

        // Synthesize results for frames still in flight so their
        // FrameTimings finalize: a watch that never fired gets an unknown
        // render time, and an unpresented frame is dropped.
        let mut pending: Vec<(Rc<FrameTimings>, usize, bool, bool)> = Vec::new();
        {
            let inner = self.inner.borrow();
            for i in 0..inner.frames.len() {
                let idx = (i + inner.next_frame_index) % inner.image_count;
                if let Some(record) = &inner.frames[idx] {
                    if !record.frame_timings.finalized() {
                        pending.push((
                            Rc::clone(&record.frame_timings),
                            record.swapchain_index,
                            record.render_finished_watch.is_watching(),
                            record.presented,
                        ));
                    }
                }
            }
        }
        for (timings, swapchain_index, still_watching, was_presented) in pending {
            if still_watching {
                timings.on_frame_rendered(swapchain_index, TIME_DROPPED);
            }
            if !was_presented {
                timings.on_frame_dropped(swapchain_index);
            }
        }

        let mut inner = self.inner.borrow_mut();
        let manager = Rc::clone(&inner.display_manager);
        let mut manager = manager.borrow_mut();
        for framebuffer in inner.framebuffers.drain(..) {
            manager.release_image(framebuffer.image.image_id);
            manager.release_buffer_collection(framebuffer.collection_id);
        }
        if inner.display.unclaim().is_err() {
            warn!("display was not claimed during swapchain teardown");
        }
    }
}
