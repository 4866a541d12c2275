//! Output device abstraction
//!
//! The scheduler never writes samples into a callback itself. It hands the
//! device a buffer plus a start time on the device clock and keeps a handle
//! it can cancel, the same model a Web Audio buffer source follows.

use crate::error::AudioError;

/// A device with a monotonic clock that plays buffers at given times
pub trait OutputDevice: Send + Sync {
    /// Current device time in seconds
    fn now(&self) -> f64;

    /// Output sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Queue `samples` (mono) to start at `start_time` seconds
    fn schedule(&self, samples: Vec<f32>, start_time: f64) -> Box<dyn ScheduledUnit>;

    /// Drop every scheduled unit that has not finished playing
    fn flush(&self);
}

/// Handle to one scheduled buffer
pub trait ScheduledUnit: Send {
    /// Stop the unit. Fails with [`AudioError::UnitFinished`] when it
    /// already played out.
    fn cancel(self: Box<Self>) -> Result<(), AudioError>;

    /// Device time at which the unit starts
    fn start_time(&self) -> f64;

    /// Length in seconds
    fn duration(&self) -> f64;
}
