//! Headless output device
//!
//! Keeps the device timeline in memory instead of driving hardware. The
//! clock either follows the tokio clock (so paused-time tests advance it)
//! or is stepped by hand through a [`ManualClock`].

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;

use crate::audio::output::{OutputDevice, ScheduledUnit};
use crate::error::AudioError;

/// What happened to a scheduled unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    Scheduled,
    Cancelled,
    Flushed,
}

/// One entry of the virtual timeline
#[derive(Debug, Clone)]
pub struct UnitRecord {
    pub id: u64,
    pub start_time: f64,
    pub samples: Vec<f32>,
    pub status: UnitStatus,
}

impl UnitRecord {
    pub fn end_time(&self, sample_rate: u32) -> f64 {
        self.start_time + self.samples.len() as f64 / sample_rate as f64
    }
}

enum Clock {
    Tokio(Instant),
    Manual(Arc<Mutex<f64>>),
}

struct Timeline {
    clock: Clock,
    sample_rate: u32,
    units: Mutex<Vec<UnitRecord>>,
}

impl Timeline {
    fn now(&self) -> f64 {
        match &self.clock {
            Clock::Tokio(origin) => origin.elapsed().as_secs_f64(),
            Clock::Manual(time) => *time.lock(),
        }
    }
}

/// Hand-stepped device clock
#[derive(Clone)]
pub struct ManualClock(Arc<Mutex<f64>>);

impl ManualClock {
    pub fn advance(&self, secs: f64) {
        *self.0.lock() += secs;
    }

    pub fn set(&self, secs: f64) {
        *self.0.lock() = secs;
    }

    pub fn now(&self) -> f64 {
        *self.0.lock()
    }
}

/// In-memory output device
#[derive(Clone)]
pub struct VirtualOutput {
    timeline: Arc<Timeline>,
}

impl VirtualOutput {
    /// Device whose clock follows tokio time from now on
    pub fn new(sample_rate: u32) -> Self {
        Self::with_clock(sample_rate, Clock::Tokio(Instant::now()))
    }

    /// Device whose clock only moves through the returned handle
    pub fn with_manual_clock(sample_rate: u32) -> (Self, ManualClock) {
        let time = Arc::new(Mutex::new(0.0));
        let clock = ManualClock(time.clone());
        (Self::with_clock(sample_rate, Clock::Manual(time)), clock)
    }

    fn with_clock(sample_rate: u32, clock: Clock) -> Self {
        Self {
            timeline: Arc::new(Timeline {
                clock,
                sample_rate,
                units: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Snapshot of every unit ever scheduled, in submission order
    pub fn units(&self) -> Vec<UnitRecord> {
        self.timeline.units.lock().clone()
    }

    /// Units still set to play (not cancelled or flushed)
    pub fn active_units(&self) -> Vec<UnitRecord> {
        self.timeline
            .units
            .lock()
            .iter()
            .filter(|u| u.status == UnitStatus::Scheduled)
            .cloned()
            .collect()
    }

    /// Total samples submitted and not withdrawn
    pub fn scheduled_samples(&self) -> usize {
        self.active_units().iter().map(|u| u.samples.len()).sum()
    }
}

impl OutputDevice for VirtualOutput {
    fn now(&self) -> f64 {
        self.timeline.now()
    }

    fn sample_rate(&self) -> u32 {
        self.timeline.sample_rate
    }

    fn schedule(&self, samples: Vec<f32>, start_time: f64) -> Box<dyn ScheduledUnit> {
        let duration = samples.len() as f64 / self.timeline.sample_rate as f64;
        let mut units = self.timeline.units.lock();
        let id = units.len() as u64;
        units.push(UnitRecord {
            id,
            start_time,
            samples,
            status: UnitStatus::Scheduled,
        });

        Box::new(VirtualUnit {
            id,
            start_time,
            duration,
            timeline: self.timeline.clone(),
        })
    }

    fn flush(&self) {
        let now = self.timeline.now();
        let rate = self.timeline.sample_rate;
        for unit in self.timeline.units.lock().iter_mut() {
            if unit.status == UnitStatus::Scheduled && unit.end_time(rate) > now {
                unit.status = UnitStatus::Flushed;
            }
        }
    }
}

struct VirtualUnit {
    id: u64,
    start_time: f64,
    duration: f64,
    timeline: Arc<Timeline>,
}

impl ScheduledUnit for VirtualUnit {
    fn cancel(self: Box<Self>) -> Result<(), AudioError> {
        if self.timeline.now() >= self.start_time + self.duration {
            return Err(AudioError::UnitFinished);
        }
        let mut units = self.timeline.units.lock();
        match units.get_mut(self.id as usize) {
            Some(unit) if unit.status == UnitStatus::Scheduled => {
                unit.status = UnitStatus::Cancelled;
                Ok(())
            }
            _ => Err(AudioError::UnitFinished),
        }
    }

    fn start_time(&self) -> f64 {
        self.start_time
    }

    fn duration(&self) -> f64 {
        self.duration
    }
}
