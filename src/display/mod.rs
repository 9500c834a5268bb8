//! Display Abstraction
//!
//! The core never talks to display hardware directly. This module defines
//! what it expects from one:
//!
//! - [`Display`] — per-display metadata and vsync bookkeeping (interval
//!   estimation, last-vsync extrapolation, claim/unclaim mutual
//!   exclusion, ownership state).
//! - [`DisplayController`] — the driver-side capability set: importing
//!   events and images, configuring the primary layer, flipping to an
//!   image, vsync delivery.
//! - [`DisplayManager`] — glue between the two: waits for the default
//!   display, allocates driver event ids, fans vsync out to the
//!   swapchain, and forwards ownership changes.

mod display;
mod manager;

pub use display::{Display, PixelFormat, MAXIMUM_VSYNC_INTERVAL, VSYNC_INTERVAL_60HZ};
pub use manager::{
    ColorTransform, DisplayController, DisplayInfo, DisplayManager, ImageConfig, VsyncCallback,
    INVALID_DISPLAY_ID,
};
