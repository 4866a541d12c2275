//! Stream player
//!
//! Owns the three pipeline stages for one session and exposes the host
//! surface: feed frames, clear for barge-in, read queue statistics.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::audio::OutputDevice;
use crate::codec::{DecoderFactory, FrameDecoder};
use crate::config::PlaybackConfig;
use crate::error::{CodecError, Result};
use crate::pipeline::{
    DecodeStage, FrameIngestion, PipelineShared, PlaybackScheduler, PlaybackState,
};
use crate::stats::AudioStats;

/// Adaptive playback of a live stream of encoded frames
pub struct StreamPlayer {
    shared: Arc<PipelineShared>,
    decoder_factory: DecoderFactory,
    /// Decoder created ahead of `start`
    preloaded: Mutex<Option<Box<dyn FrameDecoder>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamPlayer {
    /// Create a player and try to warm up a decoder.
    ///
    /// Nothing runs until [`StreamPlayer::start`].
    pub fn new(
        config: PlaybackConfig,
        decoder_factory: DecoderFactory,
        output: Arc<dyn OutputDevice>,
    ) -> Self {
        if output.sample_rate() != config.sample_rate {
            tracing::warn!(
                "Output runs at {} Hz but the stream is {} Hz; playback speed will be off",
                output.sample_rate(),
                config.sample_rate
            );
        }

        let player = Self {
            shared: PipelineShared::new(config, output),
            decoder_factory,
            preloaded: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        };
        player.preload();
        player
    }

    /// Create a decoder ahead of time. Failure is logged; `start` retries.
    pub fn preload(&self) {
        let mut preloaded = self.preloaded.lock();
        if preloaded.is_some() {
            return;
        }
        match (self.decoder_factory)() {
            Ok(decoder) => *preloaded = Some(decoder),
            Err(e) => tracing::warn!("Decoder preload failed, will retry on start: {}", e),
        }
    }

    /// Launch the ingestion, decode and scheduler tasks.
    ///
    /// Fails with [`CodecError::DecoderUnavailable`] when no decoder can be
    /// created; nothing is launched then and a later call may retry.
    /// Calling it while already running does nothing.
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            tracing::debug!("Player already running");
            return Ok(());
        }

        let preloaded = self.preloaded.lock().take();
        let decoder = match preloaded {
            Some(decoder) => decoder,
            None => match (self.decoder_factory)() {
                Ok(decoder) => decoder,
                Err(e) => {
                    tracing::error!("Failed to create decoder: {}", e);
                    return Err(CodecError::DecoderUnavailable(e.to_string()).into());
                }
            },
        };

        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return Ok(());
        }
        tasks.push(tokio::spawn(FrameIngestion::new(self.shared.clone()).run()));
        tasks.push(tokio::spawn(
            DecodeStage::new(self.shared.clone(), decoder).run(),
        ));
        tasks.push(tokio::spawn(
            PlaybackScheduler::new(self.shared.clone()).run(),
        ));

        tracing::info!(
            "Stream player started: {} Hz, start threshold {} samples, {} samples per unit",
            self.shared.config.sample_rate,
            self.shared.config.start_threshold_samples(),
            self.shared.config.chunk_samples()
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    /// Feed one encoded frame. A zero-length frame marks the end of the
    /// stream so the last partial unit gets played.
    pub fn enqueue_audio_data(&self, frame: impl Into<Bytes>) {
        let frame = frame.into();
        if !frame.is_empty() {
            self.shared.incoming.push(frame);
            return;
        }

        let mut st = self.shared.lock();
        if st.state != PlaybackState::Idle || self.shared.upstream_has_audio(&st) {
            st.end_of_stream = true;
            drop(st);
            self.shared.end_of_stream_signal.notify_one();
            tracing::debug!("End of stream marker received");
        } else {
            tracing::debug!("End of stream marker with nothing queued, ignoring");
        }
    }

    /// Drop all queued and scheduled audio and go back to Idle
    pub fn clear_all_audio(&self) {
        self.shared.clear();
        tracing::info!("Cleared all audio");
    }

    pub fn get_audio_stats(&self) -> AudioStats {
        self.shared.stats()
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.lock().state
    }

    /// Device time at which currently scheduled audio ends
    pub fn horizon(&self) -> f64 {
        self.shared.lock().horizon
    }

    /// Abort the stage tasks and clear all audio. `start` may be called again.
    pub fn stop(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.abort();
        }
        self.shared.clear();
        tracing::info!("Stream player stopped");
    }
}

impl Drop for StreamPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}
