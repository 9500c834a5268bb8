//! Synchronization Primitives
//!
//! Fence and semaphore plumbing between clients, the core, the renderer,
//! and the display driver:
//!
//! - [`Fence`] — a one-shot CPU-visible signal with asynchronous,
//!   cancellable waits. Handles are duplicable so the core and the driver
//!   can each hold one.
//! - [`GpuSemaphore`] — an opaque GPU synchronization handle. The core
//!   never inspects it; it only threads it through the renderer and
//!   swapchain interfaces. Each semaphore carries a paired [`Fence`] that
//!   stands in for the CPU-visible view of the same underlying object.
//! - [`FenceSetListener`] — waits for a whole set of acquire fences.
//! - [`CommandBufferSequencer`] / [`ReleaseFenceSignaller`] — order
//!   CPU-visible release fences against the monotonic GPU command-buffer
//!   sequence.
//! - [`EventPair`] — paired tokens used by the view linker; dropping one
//!   half notifies a peer-closed waiter on the other.

mod event_pair;
mod fence;
mod fence_set;
mod release;
mod semaphore;

pub use event_pair::{EventPair, PeerClosedWatch};
pub use fence::{Fence, FenceWatch};
pub use fence_set::FenceSetListener;
pub use release::{CommandBufferSequencer, ReleaseFenceSignaller};
pub use semaphore::GpuSemaphore;
