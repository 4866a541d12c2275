//! Decode stage
//!
//! Turns batches of encoded frames into normalized f32 samples. Frames are
//! decoded in order; a frame that fails contributes nothing and the rest
//! of the batch still goes through.

use bytes::Bytes;
use std::sync::Arc;

use crate::codec::FrameDecoder;
use crate::pipeline::shared::{PipelineShared, PlaybackState};

/// Full-scale value of 16-bit PCM
const I16_SCALE: f32 = 32768.0;

/// Convert 16-bit PCM to f32 in [-1.0, 1.0)
pub fn pcm_to_f32(pcm: &[i16], out: &mut Vec<f32>) {
    out.reserve(pcm.len());
    out.extend(pcm.iter().map(|&s| s as f32 / I16_SCALE));
}

pub struct DecodeStage {
    shared: Arc<PipelineShared>,
    decoder: Box<dyn FrameDecoder>,
    /// Batches in a row that decoded to nothing
    consecutive_empty: u32,
    /// Generation of the stream the decoder state belongs to
    generation: u64,
}

impl DecodeStage {
    pub fn new(shared: Arc<PipelineShared>, decoder: Box<dyn FrameDecoder>) -> Self {
        Self {
            shared,
            decoder,
            consecutive_empty: 0,
            generation: 0,
        }
    }

    /// Decode every frame of `frames` and concatenate the samples
    pub fn decode_batch(&mut self, frames: &[Bytes]) -> Vec<f32> {
        let mut samples = Vec::with_capacity(frames.len() * self.decoder.frame_size());
        for frame in frames {
            let pcm = self.decoder.decode(frame);
            pcm_to_f32(&pcm, &mut samples);
        }

        if !frames.is_empty() && samples.is_empty() {
            self.consecutive_empty += 1;
            tracing::warn!(
                "Decoded 0 samples from {} frames ({} empty batches in a row)",
                frames.len(),
                self.consecutive_empty
            );
        } else if !samples.is_empty() {
            self.consecutive_empty = 0;
        }

        samples
    }

    pub fn consecutive_empty(&self) -> u32 {
        self.consecutive_empty
    }

    /// Run for the lifetime of the session
    pub async fn run(mut self) {
        loop {
            let batch = self
                .shared
                .pending_decode
                .dequeue_batch(1, None, None::<fn(usize)>)
                .await;

            {
                let mut st = self.shared.lock();
                if self.shared.pending_decode.generation() != batch.generation {
                    continue;
                }
                st.decoding = batch.items.len();
            }

            if batch.generation != self.generation {
                tracing::debug!("New stream, resetting decoder");
                self.decoder.reset();
                self.generation = batch.generation;
            }

            let samples = self.decode_batch(&batch.items);
            tracing::trace!(
                "Decoded {} frames into {} samples",
                batch.items.len(),
                samples.len()
            );

            let mut st = self.shared.lock();
            if self.shared.pending_decode.generation() == batch.generation {
                st.decoding = 0;
                if !samples.is_empty() && st.state == PlaybackState::Idle {
                    st.state = PlaybackState::Buffering;
                }
                self.shared.ready.enqueue(samples);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::VirtualOutput;
    use crate::config::PlaybackConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Emits one PCM sample per byte; frames starting with 0xFF fail
    struct StubDecoder;

    impl FrameDecoder for StubDecoder {
        fn decode(&mut self, frame: &[u8]) -> Vec<i16> {
            if frame.first() == Some(&0xFF) {
                return Vec::new();
            }
            frame.iter().map(|&b| (b as i16) << 8).collect()
        }

        fn frame_size(&self) -> usize {
            4
        }
    }

    fn stage() -> (Arc<PipelineShared>, DecodeStage) {
        let shared =
            PipelineShared::new(PlaybackConfig::default(), Arc::new(VirtualOutput::new(16000)));
        let stage = DecodeStage::new(shared.clone(), Box::new(StubDecoder));
        (shared, stage)
    }

    #[test]
    fn test_pcm_conversion_range() {
        let mut out = Vec::new();
        pcm_to_f32(&[i16::MIN, 0, 16384, i16::MAX], &mut out);
        assert_eq!(out[0], -1.0);
        assert_eq!(out[1], 0.0);
        assert_eq!(out[2], 0.5);
        assert!(out[3] < 1.0);
    }

    #[tokio::test]
    async fn test_bad_frame_does_not_drop_batch() {
        let (_shared, mut stage) = stage();
        let frames = vec![
            Bytes::from_static(&[1, 2]),
            Bytes::from_static(&[0xFF, 0xFF, 0xFF]),
            Bytes::from_static(&[3]),
        ];

        let samples = stage.decode_batch(&frames);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], 256.0 / 32768.0);
        assert_eq!(samples[2], 768.0 / 32768.0);
        assert_eq!(stage.consecutive_empty(), 0);
    }

    #[tokio::test]
    async fn test_all_frames_failing_counts_empty_batches() {
        let (_shared, mut stage) = stage();
        let bad = vec![Bytes::from_static(&[0xFF]); 2];

        assert!(stage.decode_batch(&bad).is_empty());
        assert!(stage.decode_batch(&bad).is_empty());
        assert_eq!(stage.consecutive_empty(), 2);

        stage.decode_batch(&[Bytes::from_static(&[1])]);
        assert_eq!(stage.consecutive_empty(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_publishes_samples_in_order() {
        let (shared, stage) = stage();
        let task = tokio::spawn(stage.run());

        shared.pending_decode.enqueue(vec![
            Bytes::from_static(&[1, 2]),
            Bytes::from_static(&[0xFF]),
            Bytes::from_static(&[3, 4]),
        ]);
        tokio::time::sleep(Duration::from_millis(1)).await;

        let ready = shared.ready.dequeue_min(1, Some(Duration::ZERO)).await;
        let expected: Vec<f32> = [1i16, 2, 3, 4]
            .iter()
            .map(|b| (b << 8) as f32 / 32768.0)
            .collect();
        assert_eq!(ready, expected);
        assert_eq!(shared.lock().decoding, 0);
        assert_eq!(shared.lock().state, PlaybackState::Buffering);

        task.abort();
    }

    /// Clears the pipeline while a batch is being decoded
    struct ClearingDecoder {
        shared: Arc<PipelineShared>,
    }

    impl FrameDecoder for ClearingDecoder {
        fn decode(&mut self, frame: &[u8]) -> Vec<i16> {
            self.shared.clear();
            vec![1000; frame.len()]
        }

        fn frame_size(&self) -> usize {
            4
        }
    }

    /// Counts resets between streams
    struct CountingDecoder {
        resets: Arc<AtomicUsize>,
    }

    impl FrameDecoder for CountingDecoder {
        fn decode(&mut self, frame: &[u8]) -> Vec<i16> {
            vec![0; frame.len()]
        }

        fn frame_size(&self) -> usize {
            4
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_decode_discards_samples() {
        let shared =
            PipelineShared::new(PlaybackConfig::default(), Arc::new(VirtualOutput::new(16000)));
        let decoder = ClearingDecoder {
            shared: shared.clone(),
        };
        let task = tokio::spawn(DecodeStage::new(shared.clone(), Box::new(decoder)).run());

        shared
            .pending_decode
            .enqueue(vec![Bytes::from_static(&[1, 2, 3]); 2]);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(shared.pending_decode.is_empty());
        assert!(shared.ready.is_empty());
        let st = shared.lock();
        assert_eq!(st.decoding, 0);
        assert_eq!(st.state, PlaybackState::Idle);
        drop(st);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_decoder_reset_on_new_stream() {
        let shared =
            PipelineShared::new(PlaybackConfig::default(), Arc::new(VirtualOutput::new(16000)));
        let resets = Arc::new(AtomicUsize::new(0));
        let decoder = CountingDecoder {
            resets: resets.clone(),
        };
        let task = tokio::spawn(DecodeStage::new(shared.clone(), Box::new(decoder)).run());

        shared.pending_decode.push(Bytes::from_static(&[1, 2]));
        tokio::time::sleep(Duration::from_millis(1)).await;
        shared.pending_decode.push(Bytes::from_static(&[3]));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(resets.load(Ordering::SeqCst), 0);
        assert_eq!(shared.ready.len(), 3);

        shared.clear();
        shared.pending_decode.push(Bytes::from_static(&[4, 5]));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert_eq!(shared.ready.len(), 2);

        task.abort();
    }
}
