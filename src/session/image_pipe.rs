//! Streaming image pipes.

use std::collections::VecDeque;

use log::warn;
use rustc_hash::FxHashMap;

use crate::dispatch::Nanos;
use crate::errors::{SessionError, SessionResult};
use crate::sync::{Fence, FenceSetListener, ReleaseFenceSignaller};

use super::session::PresentCallback;

/// Geometry of an image added to a pipe. Pixels are opaque to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePipeImageInfo {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

struct PendingImageUpdate {
    presentation_time: Nanos,
    image_id: u32,
    acquire_fences: FenceSetListener,
    release_fences: Vec<Fence>,
    callback: PresentCallback,
}

/// Results of draining one image pipe's due updates.
pub struct ImagePipeUpdateResults {
    /// Whether the current image changed (the pipe needs a GPU upload).
    pub image_updated: bool,
    /// Presentation callbacks of every consumed update, in order.
    pub callbacks: Vec<PresentCallback>,
}

/// A client-fed stream of images used as a material texture.
///
/// Clients add images, then present them with a target time plus acquire
/// and release fences. At each frame the pipe latches the most recent
/// ready update at or before the target; every consumed update's callback
/// fires, but only the latest image survives, so multiple updates within
/// one frame window collapse into a single GPU upload.
pub struct ImagePipe {
    images: FxHashMap<u32, ImagePipeImageInfo>,
    pending: VecDeque<PendingImageUpdate>,
    current_image: Option<u32>,
    current_release_fences: Vec<Fence>,
}

impl ImagePipe {
    /// Creates an empty pipe.
    #[must_use]
    pub fn new() -> Self {
        Self {
            images: FxHashMap::default(),
            pending: VecDeque::new(),
            current_image: None,
            current_release_fences: Vec::new(),
        }
    }

    /// Registers an image id with the pipe.
    ///
    /// # Errors
    ///
    /// Rejects id 0 and ids already in use.
    pub fn add_image(&mut self, image_id: u32, info: ImagePipeImageInfo) -> SessionResult<()> {
        if image_id == 0 {
            return Err(SessionError::ReservedResourceId);
        }
        if self.images.insert(image_id, info).is_some() {
            return Err(SessionError::ResourceIdCollision(image_id));
        }
        Ok(())
    }

    /// Removes an image id. Updates already queued against it are
    /// dropped at latch time with a warning.
    pub fn remove_image(&mut self, image_id: u32) -> SessionResult<()> {
        if self.images.remove(&image_id).is_none() {
            return Err(SessionError::InvalidResourceId(image_id));
        }
        Ok(())
    }

    /// Queues `image_id` for presentation at or after `presentation_time`.
    pub fn present_image(
        &mut self,
        image_id: u32,
        presentation_time: Nanos,
        acquire_fences: Vec<Fence>,
        release_fences: Vec<Fence>,
        callback: PresentCallback,
    ) -> SessionResult<()> {
        if !self.images.contains_key(&image_id) {
            return Err(SessionError::InvalidResourceId(image_id));
        }
        if let Some(back) = self.pending.back() {
            if presentation_time < back.presentation_time {
                return Err(SessionError::OutOfOrderPresent {
                    requested: presentation_time,
                    last_scheduled: back.presentation_time,
                });
            }
        }
        self.pending.push_back(PendingImageUpdate {
            presentation_time,
            image_id,
            acquire_fences: FenceSetListener::new(acquire_fences),
            release_fences,
            callback,
        });
        Ok(())
    }

    /// The requested time of the earliest queued update, if any.
    #[must_use]
    pub fn next_presentation_time(&self) -> Option<Nanos> {
        self.pending.front().map(|u| u.presentation_time)
    }

    /// The image currently latched for display, if any.
    #[must_use]
    pub fn current_image(&self) -> Option<u32> {
        self.current_image
    }

    /// Latches the most recent ready update at or before `target`.
    ///
    /// Consumed updates have their callbacks collected; when the current
    /// image is replaced, its release fences move to `signaller` so they
    /// signal once the GPU is done with the old image.
    pub fn update(
        &mut self,
        signaller: &mut ReleaseFenceSignaller,
        target_presentation_time: Nanos,
    ) -> ImagePipeUpdateResults {
        let mut results = ImagePipeUpdateResults {
            image_updated: false,
            callbacks: Vec::new(),
        };
        while let Some(front) = self.pending.front() {
            if front.presentation_time > target_presentation_time || !front.acquire_fences.ready()
            {
                break;
            }
            let update = self
                .pending
                .pop_front()
                .expect("pending update must exist after the front was inspected");

            if !self.images.contains_key(&update.image_id) {
                warn!(
                    "image pipe update for removed image {} dropped",
                    update.image_id
                );
                results.callbacks.push(update.callback);
                continue;
            }

            // Replacing the current image: its release fences signal once
            // the GPU has consumed everything submitted so far.
            for fence in self.current_release_fences.drain(..) {
                if let Err(error) = signaller.add_cpu_release_fence(fence) {
                    warn!("failed to stage image pipe release fence: {error}");
                }
            }
            self.current_image = Some(update.image_id);
            self.current_release_fences = update.release_fences;
            results.image_updated = true;
            results.callbacks.push(update.callback);
        }
        results
    }
}

impl Default for ImagePipe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ImagePipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePipe")
            .field("images", &self.images.len())
            .field("pending", &self.pending.len())
            .field("current_image", &self.current_image)
            .finish()
    }
}
