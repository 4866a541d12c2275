//! Configuration for the stream player
//!
//! Everything is read from a TOML file; missing sections and fields fall
//! back to the defaults below. Nothing here is ever written back.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub playback: PlaybackConfig,
    pub codec: CodecConfig,
    pub network: NetworkConfig,
}

/// Buffering and scheduling parameters of the playback pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output sample rate in Hz (matches the decoder rate)
    pub sample_rate: u32,
    /// Minimum audio duration in seconds; playback starts once twice this is buffered
    pub min_audio_duration: f64,
    /// Duration of one scheduled output unit in seconds
    pub play_chunk_secs: f64,
    /// Frames to collect before the first flush of a stream
    pub preroll_count: usize,
    /// Upper bound on the pre-roll wait
    pub preroll_timeout_ms: u64,
    /// Frames requested per steady-state drain
    pub drain_count: usize,
    /// Steady-state drain timeout; also bounds the batching latency
    pub drain_timeout_ms: u64,
    /// Samples counted as one frame when reporting `pending_play`
    pub stats_frame_samples: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            min_audio_duration: DEFAULT_MIN_AUDIO_DURATION,
            play_chunk_secs: DEFAULT_PLAY_CHUNK_SECS,
            preroll_count: DEFAULT_PREROLL_COUNT,
            preroll_timeout_ms: DEFAULT_PREROLL_TIMEOUT_MS,
            drain_count: DEFAULT_DRAIN_COUNT,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            stats_frame_samples: DEFAULT_FRAME_SIZE,
        }
    }
}

impl PlaybackConfig {
    /// Samples that must be buffered before playback starts (and before each refill)
    pub fn start_threshold_samples(&self) -> usize {
        (self.sample_rate as f64 * self.min_audio_duration * 2.0) as usize
    }

    /// Samples in one scheduled chunk
    pub fn chunk_samples(&self) -> usize {
        (self.sample_rate as f64 * self.play_chunk_secs) as usize
    }

    pub fn preroll_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.preroll_timeout_ms)
    }

    pub fn drain_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Parameters of the negotiated Opus stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_duration_ms: u32,
    /// Sender bitrate in bits per second
    pub bitrate_bps: u32,
    /// Sender complexity (0-10)
    pub complexity: u8,
    /// Whether the sender suppresses silent frames
    pub dtx_enabled: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frame_duration_ms: DEFAULT_FRAME_DURATION_MS,
            bitrate_bps: DEFAULT_BITRATE,
            complexity: DEFAULT_COMPLEXITY,
            dtx_enabled: true,
        }
    }
}

impl CodecConfig {
    /// Calculate frame size in samples from duration
    pub fn frame_size_from_ms(sample_rate: u32, ms: f32) -> usize {
        (sample_rate as f32 * ms / 1000.0) as usize
    }

    /// Samples per channel in one frame
    pub fn frame_size(&self) -> usize {
        Self::frame_size_from_ms(self.sample_rate, self.frame_duration_ms as f32)
    }
}

/// Receiver host settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    /// UDP port carrying one encoded frame per datagram
    pub audio_port: u16,
    /// UDP port carrying JSON control messages
    pub control_port: u16,
    /// Socket receive buffer size in bytes
    pub recv_buffer_size: usize,
    /// Interval between stats log lines
    pub stats_interval_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            audio_port: DEFAULT_AUDIO_PORT,
            control_port: DEFAULT_CONTROL_PORT,
            recv_buffer_size: 256 * 1024,
            stats_interval_secs: 5,
        }
    }
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from `path` if given, else from the platform config directory,
    /// else fall back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let p = &self.playback;
        if p.sample_rate == 0 {
            return Err(Error::Config("playback.sample_rate must be positive".into()));
        }
        if p.chunk_samples() == 0 {
            return Err(Error::Config("playback.play_chunk_secs is too small".into()));
        }
        if p.start_threshold_samples() == 0 {
            return Err(Error::Config("playback.min_audio_duration is too small".into()));
        }
        if p.stats_frame_samples == 0 {
            return Err(Error::Config("playback.stats_frame_samples must be positive".into()));
        }
        if p.drain_count == 0 {
            return Err(Error::Config("playback.drain_count must be positive".into()));
        }
        if self.codec.sample_rate != p.sample_rate {
            return Err(Error::Config(format!(
                "codec.sample_rate ({}) must match playback.sample_rate ({})",
                self.codec.sample_rate, p.sample_rate
            )));
        }
        // Playback is mono end to end
        if self.codec.channels != 1 {
            return Err(Error::Config(format!(
                "codec.channels must be 1 (mono), got {}",
                self.codec.channels
            )));
        }
        if self.codec.complexity > 10 {
            return Err(Error::Config("codec.complexity must be within 0-10".into()));
        }
        Ok(())
    }
}

/// `<platform config dir>/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "voice-stream", "voice-stream-player")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
