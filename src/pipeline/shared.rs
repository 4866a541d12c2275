//! State shared by the pipeline stages
//!
//! Each queue has exactly one consumer. Everything else mutable lives in
//! [`SchedulerState`] behind a single mutex, which `clear_all_audio` takes
//! too; stages check the source queue's generation under that mutex before
//! handing data on, so nothing taken before a clear surfaces after it.

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::audio::{OutputDevice, ScheduledUnit};
use crate::config::PlaybackConfig;
use crate::error::AudioError;
use crate::queue::{BlockingQueue, SharedQueue};
use crate::stats::AudioStats;

/// Playback state of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing buffered, nothing playing
    Idle,
    /// Samples held, start threshold not reached yet
    Buffering,
    /// Units are being scheduled on the device
    Playing,
}

/// Mutable scheduler state, guarded by [`PipelineShared::lock`]
pub struct SchedulerState {
    pub state: PlaybackState,
    /// Device time at which everything scheduled so far has played out
    pub horizon: f64,
    pub end_of_stream: bool,
    /// Samples pulled from the ready queue but not yet scheduled
    pub working: VecDeque<f32>,
    /// Handle of the most recently scheduled unit
    pub current: Option<Box<dyn ScheduledUnit>>,
    /// Frames in the batch the decode stage is working on
    pub decoding: usize,
}

/// Queues, output device and scheduler state of one session
pub struct PipelineShared {
    pub config: PlaybackConfig,
    /// Frames from the transport, drained by ingestion
    pub incoming: SharedQueue<Bytes>,
    /// Frame batches flushed by ingestion, drained by the decode stage
    pub pending_decode: SharedQueue<Bytes>,
    /// Decoded samples, drained by the scheduler
    pub ready: SharedQueue<f32>,
    pub output: Arc<dyn OutputDevice>,
    state: Mutex<SchedulerState>,
    /// Wakes the scheduler when an end-of-stream marker arrives
    pub end_of_stream_signal: Notify,
}

impl PipelineShared {
    pub fn new(config: PlaybackConfig, output: Arc<dyn OutputDevice>) -> Arc<Self> {
        let horizon = output.now();
        Arc::new(Self {
            config,
            incoming: Arc::new(BlockingQueue::new()),
            pending_decode: Arc::new(BlockingQueue::new()),
            ready: Arc::new(BlockingQueue::new()),
            output,
            state: Mutex::new(SchedulerState {
                state: PlaybackState::Idle,
                horizon,
                end_of_stream: false,
                working: VecDeque::new(),
                current: None,
                decoding: 0,
            }),
            end_of_stream_signal: Notify::new(),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock()
    }

    /// Whether frames or samples are still on their way to the scheduler
    pub fn upstream_has_audio(&self, state: &SchedulerState) -> bool {
        !self.incoming.is_empty()
            || !self.pending_decode.is_empty()
            || state.decoding > 0
            || !self.ready.is_empty()
    }

    /// Drop everything queued and reset the scheduler to Idle
    pub fn clear(&self) {
        let mut st = self.lock();

        self.incoming.clear();
        self.pending_decode.clear();
        self.ready.clear();
        st.working.clear();
        st.decoding = 0;

        if let Some(unit) = st.current.take() {
            match unit.cancel() {
                Ok(()) => {}
                Err(AudioError::UnitFinished) => {
                    tracing::debug!("Current unit had already finished");
                }
                Err(e) => tracing::warn!("Failed to cancel scheduled unit: {}", e),
            }
        }
        self.output.flush();

        st.state = PlaybackState::Idle;
        st.horizon = self.output.now();
        st.end_of_stream = false;
    }

    /// Snapshot of how much audio is still queued
    pub fn stats(&self) -> AudioStats {
        let st = self.lock();

        let pending_decode = self.incoming.len() + self.pending_decode.len() + st.decoding;

        let scheduled_remaining = if st.state == PlaybackState::Playing {
            let remaining = (st.horizon - self.output.now()).max(0.0);
            (remaining * self.config.sample_rate as f64).floor() as usize
        } else {
            0
        };
        let queued_samples = self.ready.len() + st.working.len() + scheduled_remaining;

        AudioStats::new(
            pending_decode,
            queued_samples.div_ceil(self.config.stats_frame_samples),
        )
    }
}
