//! The Frame Pipeline
//!
//! Ties everything together: the [`FrameScheduler`] computes
//! wakeup/target-vsync pairs from session requests, the [`Engine`]
//! (as the scheduler's delegate) latches session updates into the scene
//! graph and drives the swapchain through a [`LayerRenderer`], and
//! [`FrameTimings`]/[`FrameStats`] track each frame through to
//! presentation.
//!
//! Data flow per frame: session update queue → (acquire fences ready) →
//! scheduler request → wakeup at the computed time → command application
//! → render → swapchain flip → display vsync → timings finalize →
//! release fences staged → present callbacks fired.

#[allow(clippy::module_inception)]
pub mod engine;
pub mod frame_scheduler;
pub mod frame_stats;
pub mod frame_timings;
pub mod renderer;

pub use engine::Engine;
pub use frame_scheduler::{
    FrameScheduler, SchedulerDelegate, SessionUpdate, SessionUpdater, UpdateResults,
};
pub use frame_stats::{FrameStats, FrameStatsSummary};
pub use frame_timings::{
    FrameTimings, FrameTimingsListener, Timestamps, TIME_DROPPED, TIME_UNINITIALIZED,
};
pub use renderer::{FrameRenderer, LayerRenderer};
