//! Opaque GPU semaphores.

use std::sync::atomic::{AtomicU64, Ordering};

use super::Fence;

static NEXT_SEMAPHORE_ID: AtomicU64 = AtomicU64::new(1);

/// An opaque handle representing synchronization with the GPU.
///
/// The core never inspects a semaphore's value; it only threads the
/// handle through the renderer and swapchain interfaces. Each semaphore
/// carries a paired [`Fence`] standing in for the CPU-visible side of the
/// same underlying object: a renderer that signals GPU completion does so
/// by signalling the fence, and the swapchain duplicates the fence to
/// hand the driver its "render done" event.
#[derive(Clone)]
pub struct GpuSemaphore {
    id: u64,
    fence: Fence,
}

impl GpuSemaphore {
    /// Creates a fresh semaphore with an unsignalled paired fence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_SEMAPHORE_ID.fetch_add(1, Ordering::Relaxed),
            fence: Fence::new(),
        }
    }

    /// Process-unique id of this semaphore.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The CPU-visible fence paired with this semaphore.
    #[must_use]
    pub fn fence(&self) -> &Fence {
        &self.fence
    }
}

impl Default for GpuSemaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GpuSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuSemaphore").field("id", &self.id).finish()
    }
}
