//! Per-display metadata and vsync bookkeeping.

use std::cell::Cell;

use log::warn;

use crate::dispatch::{Nanos, MILLISECOND};
use crate::errors::{PrismError, Result};

/// Vsync interval of a 60 Hz screen, used before real timings arrive.
pub const VSYNC_INTERVAL_60HZ: Nanos = 16_666_667;

/// The longest vsync interval we would ever believe. Deltas above this
/// are treated as driver hiccups and ignored.
pub const MAXIMUM_VSYNC_INTERVAL: Nanos = 100 * MILLISECOND;

/// Pixel formats a display can scan out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32-bit ARGB, 8 bits per channel.
    Argb8888,
    /// 32-bit RGB with ignored alpha.
    Rgbx8888,
    /// 32-bit BGRA, 8 bits per channel.
    Bgra8888,
}

/// A physical display as seen by the core.
///
/// Tracks the vsync cadence reported by the driver and arbitrates which
/// renderer may draw into the display. Vsync timing starts from the 60 Hz
/// default and is refined from observed timestamp deltas.
pub struct Display {
    id: u64,
    width_px: u32,
    height_px: u32,
    pixel_formats: Vec<PixelFormat>,

    last_vsync_time: Cell<Nanos>,
    vsync_interval: Cell<Nanos>,
    claimed: Cell<bool>,
    owned: Cell<bool>,
}

impl Display {
    /// Creates a display record with default (60 Hz) vsync timing.
    #[must_use]
    pub fn new(id: u64, width_px: u32, height_px: u32, pixel_formats: Vec<PixelFormat>) -> Self {
        Self {
            id,
            width_px,
            height_px,
            pixel_formats,
            last_vsync_time: Cell::new(0),
            vsync_interval: Cell::new(VSYNC_INTERVAL_60HZ),
            claimed: Cell::new(false),
            owned: Cell::new(false),
        }
    }

    /// The display's id in the driver's namespace.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Horizontal resolution in pixels.
    #[must_use]
    pub fn width_px(&self) -> u32 {
        self.width_px
    }

    /// Vertical resolution in pixels.
    #[must_use]
    pub fn height_px(&self) -> u32 {
        self.height_px
    }

    /// Supported pixel formats, in driver priority order.
    #[must_use]
    pub fn pixel_formats(&self) -> &[PixelFormat] {
        &self.pixel_formats
    }

    /// Picks the first supported format the core can render into.
    #[must_use]
    pub fn preferred_pixel_format(&self) -> Option<PixelFormat> {
        self.pixel_formats.first().copied()
    }

    /// Records a vsync timestamp, refining the interval estimate.
    ///
    /// Deltas outside `(0, MAXIMUM_VSYNC_INTERVAL]` do not update the
    /// estimate; the timestamp itself is still recorded.
    pub fn on_vsync(&self, timestamp: Nanos) {
        let previous = self.last_vsync_time.get();
        if previous > 0 {
            let delta = timestamp - previous;
            if delta > 0 && delta <= MAXIMUM_VSYNC_INTERVAL {
                self.vsync_interval.set(delta);
            } else {
                warn!(
                    "display {}: implausible vsync delta {delta} ns ignored",
                    self.id
                );
            }
        }
        self.last_vsync_time.set(timestamp);
    }

    /// The timestamp of the most recently observed vsync, in nanoseconds.
    #[must_use]
    pub fn last_vsync_time(&self) -> Nanos {
        self.last_vsync_time.get()
    }

    /// Extrapolates the last vsync forward by whole intervals so that the
    /// result is the most recent vsync at or before `now`.
    ///
    /// Listening for driver vsync events is the only way the core learns
    /// about vsyncs, so when the driver has gone quiet this makes an
    /// educated guess.
    #[must_use]
    pub fn extrapolated_vsync_time(&self, now: Nanos) -> Nanos {
        let last = self.last_vsync_time.get();
        let interval = self.vsync_interval.get();
        if now <= last {
            return last;
        }
        let num_intervals = (now - last) / interval;
        last + num_intervals * interval
    }

    /// The current interval between vsyncs, in nanoseconds.
    #[must_use]
    pub fn vsync_interval(&self) -> Nanos {
        self.vsync_interval.get()
    }

    /// Returns `true` while a renderer has the display claimed.
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.claimed.get()
    }

    /// Claims exclusive rendering access to this display.
    ///
    /// # Errors
    ///
    /// [`PrismError::DisplayAlreadyClaimed`] if another renderer holds it.
    pub fn claim(&self) -> Result<()> {
        if self.claimed.get() {
            return Err(PrismError::DisplayAlreadyClaimed(self.id));
        }
        self.claimed.set(true);
        Ok(())
    }

    /// Releases a previous claim.
    ///
    /// # Errors
    ///
    /// [`PrismError::DisplayNotClaimed`] if the display was not claimed.
    pub fn unclaim(&self) -> Result<()> {
        if !self.claimed.get() {
            return Err(PrismError::DisplayNotClaimed(self.id));
        }
        self.claimed.set(false);
        Ok(())
    }

    /// Whether this client currently owns the display (multi-client
    /// displays hand ownership back and forth).
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owned.get()
    }

    pub(crate) fn set_owned(&self, owned: bool) {
        self.owned.set(owned);
    }
}

impl std::fmt::Debug for Display {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Display")
            .field("id", &self.id)
            .field("width_px", &self.width_px)
            .field("height_px", &self.height_px)
            .field("vsync_interval", &self.vsync_interval.get())
            .field("claimed", &self.claimed.get())
            .finish()
    }
}
