//! Opus decoder wrapper
//!
//! Decodes one frame at a time to 16-bit PCM. Corrupt frames never abort
//! the stream: through [`FrameDecoder`] they come back as an empty block.

use opus::{Channels, Decoder};
use std::sync::Arc;

use crate::config::CodecConfig;
use crate::error::CodecError;

/// Largest Opus frame (120 ms) at 48 kHz stereo
const MAX_FRAME_SAMPLES: usize = 48000 * 2 * 120 / 1000;

/// Decodes one encoded frame to a fixed-format PCM block
pub trait FrameDecoder: Send {
    /// Decode a frame. Failure yields an empty block, never an error.
    fn decode(&mut self, frame: &[u8]) -> Vec<i16>;

    /// Nominal samples per channel in one frame
    fn frame_size(&self) -> usize;

    /// Forget inter-frame state before an unrelated stream starts
    fn reset(&mut self) {}
}

/// Creates decoders on demand; creation may fail and be retried later
pub type DecoderFactory =
    Arc<dyn Fn() -> Result<Box<dyn FrameDecoder>, CodecError> + Send + Sync>;

/// Opus decoder wrapper
pub struct OpusDecoder {
    decoder: Decoder,
    sample_rate: u32,
    channels: u16,
    frame_size: usize,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<i16>,
    frames_decoded: u64,
    frames_failed: u64,
    samples_produced: u64,
}

impl OpusDecoder {
    /// Create a new Opus decoder for the negotiated stream
    pub fn new(config: &CodecConfig) -> Result<Self, CodecError> {
        let opus_channels = match config.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => {
                return Err(CodecError::DecoderInit(format!(
                    "Unsupported channel count: {}",
                    config.channels
                )))
            }
        };

        let decoder = Decoder::new(config.sample_rate, opus_channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            decoder,
            sample_rate: config.sample_rate,
            channels: config.channels,
            frame_size: config.frame_size(),
            decode_buffer: vec![0i16; MAX_FRAME_SAMPLES],
            frames_decoded: 0,
            frames_failed: 0,
            samples_produced: 0,
        })
    }

    /// Factory producing boxed decoders for `config`
    pub fn factory(config: CodecConfig) -> DecoderFactory {
        Arc::new(move || {
            let decoder = OpusDecoder::new(&config)?;
            tracing::debug!(
                "Opus decoder ready: {} Hz, {} channel(s), {} samples/frame",
                config.sample_rate,
                config.channels,
                config.frame_size()
            );
            Ok(Box::new(decoder) as Box<dyn FrameDecoder>)
        })
    }

    /// Decode an Opus packet, reporting failures
    /// Returns interleaved i16 samples
    pub fn try_decode(&mut self, data: &[u8]) -> Result<Vec<i16>, CodecError> {
        if data.is_empty() {
            return Err(CodecError::InvalidFrameSize(0));
        }

        let samples = self
            .decoder
            .decode(data, &mut self.decode_buffer, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        let total_samples = samples * self.channels as usize;
        self.frames_decoded += 1;
        self.samples_produced += total_samples as u64;

        Ok(self.decode_buffer[..total_samples].to_vec())
    }

    /// Reset decoder state
    pub fn reset(&mut self) -> Result<(), CodecError> {
        self.decoder
            .reset_state()
            .map_err(|e| CodecError::DecoderInit(e.to_string()))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        let attempted = self.frames_decoded + self.frames_failed;
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_failed: self.frames_failed,
            samples_produced: self.samples_produced,
            failure_rate: if attempted > 0 {
                self.frames_failed as f32 / attempted as f32
            } else {
                0.0
            },
        }
    }
}

impl FrameDecoder for OpusDecoder {
    fn decode(&mut self, frame: &[u8]) -> Vec<i16> {
        match self.try_decode(frame) {
            Ok(samples) => samples,
            Err(e) => {
                self.frames_failed += 1;
                tracing::warn!("Opus decode failed ({} bytes): {}", frame.len(), e);
                Vec::new()
            }
        }
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn reset(&mut self) {
        if let Err(e) = OpusDecoder::reset(self) {
            tracing::warn!("Failed to reset Opus decoder: {}", e);
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_failed: u64,
    pub samples_produced: u64,
    pub failure_rate: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use opus::{Application, Encoder};

    fn encode_tone(config: &CodecConfig) -> Vec<u8> {
        let mut encoder =
            Encoder::new(config.sample_rate, Channels::Mono, Application::Voip).unwrap();
        encoder
            .set_bitrate(opus::Bitrate::Bits(config.bitrate_bps as i32))
            .unwrap();

        let pcm: Vec<i16> = (0..config.frame_size())
            .map(|i| {
                let t = i as f32 / config.sample_rate as f32;
                ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 8000.0) as i16
            })
            .collect();

        let mut out = vec![0u8; 4000];
        let len = encoder.encode(&pcm, &mut out).unwrap();
        out.truncate(len);
        out
    }

    #[test]
    fn test_decoder_creation() {
        let decoder = OpusDecoder::new(&CodecConfig::default()).unwrap();
        assert_eq!(decoder.sample_rate(), 16000);
        assert_eq!(FrameDecoder::frame_size(&decoder), 960);
    }

    #[test]
    fn test_rejects_unsupported_channels() {
        let config = CodecConfig {
            channels: 6,
            ..Default::default()
        };
        assert!(matches!(
            OpusDecoder::new(&config),
            Err(CodecError::DecoderInit(_))
        ));
    }

    #[test]
    fn test_decodes_full_frame() {
        let config = CodecConfig::default();
        let frame = encode_tone(&config);
        let mut decoder = OpusDecoder::new(&config).unwrap();

        let samples = FrameDecoder::decode(&mut decoder, &frame);
        assert_eq!(samples.len(), 960);
        assert_eq!(decoder.stats().frames_decoded, 1);
    }

    #[test]
    fn test_empty_frame_yields_empty_block() {
        let mut decoder = OpusDecoder::new(&CodecConfig::default()).unwrap();

        let samples = FrameDecoder::decode(&mut decoder, &[]);
        assert!(samples.is_empty());

        let stats = decoder.stats();
        assert_eq!(stats.frames_failed, 1);
        assert_eq!(stats.failure_rate, 1.0);
    }

    #[test]
    fn test_reset_keeps_decoding() {
        let config = CodecConfig::default();
        let frame = encode_tone(&config);
        let mut decoder = OpusDecoder::new(&config).unwrap();

        FrameDecoder::decode(&mut decoder, &frame);
        assert!(OpusDecoder::reset(&mut decoder).is_ok());
        FrameDecoder::reset(&mut decoder);

        let samples = FrameDecoder::decode(&mut decoder, &frame);
        assert_eq!(samples.len(), 960);
        assert_eq!(decoder.stats().frames_decoded, 2);
    }

    #[test]
    fn test_factory_builds_decoders() {
        let factory = OpusDecoder::factory(CodecConfig::default());
        let decoder = factory().unwrap();
        assert_eq!(decoder.frame_size(), 960);
    }
}
