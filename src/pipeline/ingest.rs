//! Frame ingestion
//!
//! Decouples bursty network delivery from decoding. Each stream starts
//! with a pre-roll (wait for a handful of frames, bounded by a timeout) to
//! absorb startup jitter; after that, whatever has accumulated is drained
//! every few tens of milliseconds.

use bytes::Bytes;
use std::sync::Arc;

use crate::pipeline::shared::PipelineShared;
use crate::queue::Batch;

/// Result of one pre-roll wait
#[derive(Debug)]
pub struct PrerollOutcome {
    pub batch: Batch<Bytes>,
    /// Frame count reported by the timeout, if the wait timed out
    pub timed_out: Option<usize>,
}

/// Moves frames from the transport queue to the decode queue
pub struct FrameIngestion {
    shared: Arc<PipelineShared>,
}

impl FrameIngestion {
    pub fn new(shared: Arc<PipelineShared>) -> Self {
        Self { shared }
    }

    /// Wait for the pre-roll count or the pre-roll timeout
    pub async fn preroll(&self) -> PrerollOutcome {
        let config = &self.shared.config;
        let mut timed_out = None;

        let batch = self
            .shared
            .incoming
            .dequeue_batch(
                config.preroll_count,
                Some(config.preroll_timeout()),
                Some(|count: usize| {
                    if count > 0 {
                        tracing::info!(
                            "Buffer timeout, current buffered packets: {}, starting playback",
                            count
                        );
                    }
                    timed_out = Some(count);
                }),
            )
            .await;

        PrerollOutcome { batch, timed_out }
    }

    /// Take whatever arrived within the drain timeout
    pub async fn drain(&self) -> Batch<Bytes> {
        let config = &self.shared.config;
        self.shared
            .incoming
            .dequeue_batch(
                config.drain_count,
                Some(config.drain_timeout()),
                None::<fn(usize)>,
            )
            .await
    }

    /// Pass a batch on to the decode stage. Returns the number of frames
    /// forwarded; a batch from before a clear is dropped.
    pub fn flush(&self, batch: Batch<Bytes>) -> usize {
        let _st = self.shared.lock();
        if self.shared.incoming.generation() != batch.generation {
            tracing::debug!("Dropping {} frames from a cleared stream", batch.items.len());
            return 0;
        }
        let count = batch.items.len();
        self.shared.pending_decode.enqueue(batch.items);
        count
    }

    /// Run for the lifetime of the session
    pub async fn run(self) {
        // Generation of the incoming queue whose pre-roll has been flushed
        let mut primed: Option<u64> = None;

        loop {
            if primed != Some(self.shared.incoming.generation()) {
                let outcome = self.preroll().await;
                let generation = outcome.batch.generation;
                if outcome.batch.items.is_empty() {
                    continue;
                }

                let count = self.flush(outcome.batch);
                if count > 0 {
                    tracing::info!("Buffered {} audio packets, starting playback", count);
                    primed = Some(generation);
                }
                continue;
            }

            let batch = self.drain().await;
            if primed != Some(batch.generation) {
                // Cleared while draining; these frames open the next stream
                self.shared.incoming.restore(batch);
                continue;
            }
            if !batch.items.is_empty() {
                tracing::trace!("Draining {} frames to decoder", batch.items.len());
            }
            self.flush(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::VirtualOutput;
    use crate::config::PlaybackConfig;
    use std::time::Duration;

    fn shared() -> Arc<PipelineShared> {
        PipelineShared::new(PlaybackConfig::default(), Arc::new(VirtualOutput::new(16000)))
    }

    fn frame(tag: u8) -> Bytes {
        Bytes::from(vec![tag; 40])
    }

    #[tokio::test(start_paused = true)]
    async fn test_preroll_flushes_six_frames_without_timeout() {
        let shared = shared();
        let ingestion = FrameIngestion::new(shared.clone());

        let producer = shared.clone();
        tokio::spawn(async move {
            for i in 0..6 {
                producer.incoming.push(frame(i));
                tokio::time::sleep(Duration::from_millis(8)).await;
            }
        });

        let started = tokio::time::Instant::now();
        let outcome = ingestion.preroll().await;

        assert!(started.elapsed() <= Duration::from_millis(50));
        assert_eq!(outcome.timed_out, None);
        assert_eq!(outcome.batch.items.len(), 6);
        assert_eq!(outcome.batch.items[5], frame(5));

        assert_eq!(ingestion.flush(outcome.batch), 6);
        assert_eq!(shared.pending_decode.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preroll_timeout_flushes_partial() {
        let shared = shared();
        let ingestion = FrameIngestion::new(shared.clone());
        shared.incoming.enqueue(vec![frame(1), frame(2)]);

        let started = tokio::time::Instant::now();
        let outcome = ingestion.preroll().await;

        assert!(started.elapsed() >= Duration::from_millis(400));
        assert_eq!(outcome.timed_out, Some(2));
        assert_eq!(ingestion.flush(outcome.batch), 2);
        assert_eq!(shared.pending_decode.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_drops_batch_from_before_clear() {
        let shared = shared();
        let ingestion = FrameIngestion::new(shared.clone());
        shared.incoming.enqueue(vec![frame(1); 6]);

        let outcome = ingestion.preroll().await;
        shared.clear();

        assert_eq!(ingestion.flush(outcome.batch), 0);
        assert!(shared.pending_decode.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_in_steady_state() {
        let shared = shared();
        let task = tokio::spawn(FrameIngestion::new(shared.clone()).run());

        shared.incoming.enqueue(vec![frame(0); 6]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(shared.pending_decode.len(), 6);

        // Steady state: a single late frame goes through within the drain timeout
        shared.incoming.push(frame(7));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(shared.pending_decode.len(), 7);
        assert!(shared.incoming.is_empty());

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_rearms_preroll_after_clear() {
        let shared = shared();
        let task = tokio::spawn(FrameIngestion::new(shared.clone()).run());

        shared.incoming.enqueue(vec![frame(0); 6]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        shared.clear();

        // A new stream waits for its own pre-roll again
        shared.incoming.push(frame(1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(shared.pending_decode.is_empty());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(shared.pending_decode.len(), 1);

        task.abort();
    }
}
