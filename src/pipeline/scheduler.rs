//! Playback scheduler
//!
//! Pulls decoded samples into a working queue and, once enough is buffered,
//! hands them to the output device in fixed-size units laid end to end on
//! the device clock. The horizon is the device time at which everything
//! scheduled so far finishes; each unit starts at `max(horizon, now)`, so
//! units play back to back while data keeps up and restart at "now" after
//! a starvation gap.

use std::sync::Arc;

use crate::pipeline::shared::{PipelineShared, PlaybackState, SchedulerState};
use crate::queue::Batch;

pub struct PlaybackScheduler {
    shared: Arc<PipelineShared>,
}

impl PlaybackScheduler {
    pub fn new(shared: Arc<PipelineShared>) -> Self {
        Self { shared }
    }

    /// Wait for more decoded samples and move them to the working queue.
    ///
    /// Returns early when an end-of-stream marker arrives. While the marker
    /// is set the wait is bounded by the drain timeout.
    pub async fn refill(&self) {
        if let Some(batch) = self.take_ready().await {
            self.accept(batch);
        }
    }

    /// Dequeue decoded samples up to the start threshold. `None` when woken
    /// by an end-of-stream marker instead.
    pub async fn take_ready(&self) -> Option<Batch<f32>> {
        let config = &self.shared.config;
        let (needed, draining) = {
            let st = self.shared.lock();
            let threshold = config.start_threshold_samples();
            (
                threshold.saturating_sub(st.working.len()).max(1),
                st.end_of_stream,
            )
        };

        if draining {
            Some(
                self.shared
                    .ready
                    .dequeue_batch(needed, Some(config.drain_timeout()), None::<fn(usize)>)
                    .await,
            )
        } else {
            tokio::select! {
                batch = self.shared.ready.dequeue_batch(needed, None, None::<fn(usize)>) => Some(batch),
                _ = self.shared.end_of_stream_signal.notified() => None,
            }
        }
    }

    /// Move a dequeued batch into the working queue. A batch taken before
    /// a clear is dropped; returns whether the samples were kept.
    pub fn accept(&self, batch: Batch<f32>) -> bool {
        if batch.items.is_empty() {
            return false;
        }

        let mut st = self.shared.lock();
        if self.shared.ready.generation() != batch.generation {
            tracing::debug!("Dropping {} samples from a cleared stream", batch.items.len());
            return false;
        }
        st.working.extend(batch.items);
        if st.state == PlaybackState::Idle {
            st.state = PlaybackState::Buffering;
        }
        true
    }

    /// Schedule whatever the working queue allows. Returns the number of
    /// units handed to the device.
    pub fn schedule_pending(&self) -> usize {
        let mut st = self.shared.lock();
        self.schedule_locked(&mut st)
    }

    fn schedule_locked(&self, st: &mut SchedulerState) -> usize {
        let config = &self.shared.config;
        let output = &self.shared.output;
        let threshold = config.start_threshold_samples();
        let chunk = config.chunk_samples().max(1);
        let flush_tail = st.end_of_stream && !self.shared.upstream_has_audio(st);

        let mut scheduled = 0;
        if st.working.len() >= threshold || (flush_tail && !st.working.is_empty()) {
            if st.state != PlaybackState::Playing {
                tracing::info!(
                    "Starting playback with {} buffered samples",
                    st.working.len()
                );
                st.state = PlaybackState::Playing;
            }

            while !st.working.is_empty() {
                if st.working.len() < chunk && !flush_tail {
                    break;
                }
                let take = chunk.min(st.working.len());
                let samples: Vec<f32> = st.working.drain(..take).collect();

                let now = output.now();
                let start = st.horizon.max(now);
                let unit = output.schedule(samples, start);
                st.horizon = start + take as f64 / output.sample_rate() as f64;
                st.current = Some(unit);
                scheduled += 1;

                tracing::debug!(
                    "Scheduled {} samples at {:.3}s (now {:.3}s, horizon {:.3}s)",
                    take,
                    start,
                    now,
                    st.horizon
                );
            }
        }

        if flush_tail {
            tracing::info!("End of stream, playback drained");
            st.end_of_stream = false;
        }

        scheduled
    }

    /// Run for the lifetime of the session
    pub async fn run(self) {
        loop {
            self.refill().await;
            self.schedule_pending();
        }
    }
}
