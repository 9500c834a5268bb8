//! Prism: a vsync-driven display-compositing core.
//!
//! Client sessions author a retained scene graph; a frame scheduler
//! latches their updates against predicted vsync targets; a swapchain
//! presents rendered frames with explicit fence-based synchronization
//! against the GPU. The GPU renderer and the display driver are external
//! collaborators reached through the [`engine::LayerRenderer`] and
//! [`display::DisplayController`] seams.
//!
//! The core is single-threaded and cooperative: everything runs on one
//! [`dispatch::Dispatcher`], and the only suspension points are fence
//! readiness, scheduled wakeups, render-finished events, and retired
//! events.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod dispatch;
pub mod display;
pub mod engine;
pub mod errors;
pub mod link;
pub mod scene;
pub mod session;
pub mod settings;
pub mod swapchain;
pub mod sync;

pub use dispatch::{Dispatcher, Nanos};
pub use engine::{Engine, FrameScheduler, FrameStats, FrameTimings, LayerRenderer};
pub use errors::{PrismError, Result, SessionError};
pub use scene::{SceneGraph, SessionId};
pub use session::{Command, PresentationInfo, ResourceSpec, Session};
pub use settings::CompositorSettings;
pub use swapchain::DisplaySwapchain;
pub use sync::{Fence, GpuSemaphore, ReleaseFenceSignaller};
