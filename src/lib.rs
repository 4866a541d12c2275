//! # Voice Stream Player
//!
//! Adaptive low-latency playback of Opus voice frames streamed over a
//! network link.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │  Transport (UDP datagrams / WebSocket binary messages)                    │
//! │        │ enqueue_audio_data(frame)            zero-length = end of stream │
//! │        ▼                                                                  │
//! │  ┌───────────────┐  pre-roll: 6 frames or 400 ms                          │
//! │  │   Ingestion   │  steady:   up to 99 frames every 30 ms                 │
//! │  └──────┬────────┘                                                        │
//! │         ▼  frame batches                                                  │
//! │  ┌───────────────┐  Opus → i16 → f32 (÷ 32768)                            │
//! │  │    Decode     │  one bad frame never drops the batch                   │
//! │  └──────┬────────┘                                                        │
//! │         ▼  ready samples                                                  │
//! │  ┌───────────────┐  starts at 2 × 120 ms buffered                         │
//! │  │   Scheduler   │  120 ms units at max(horizon, now), back to back        │
//! │  └──────┬────────┘                                                        │
//! │         ▼                                                                 │
//! │  ┌───────────────┐                                                        │
//! │  │ Output device │  cpal stream, or the virtual device when headless      │
//! │  └───────────────┘                                                        │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`StreamPlayer`] owns the stages. `clear_all_audio` resets all of them at
//! once for barge-in; `get_audio_stats` reports how much audio is queued.

pub mod audio;
pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod pipeline;
pub mod player;
pub mod queue;
pub mod stats;

pub use error::{Error, Result};
pub use player::StreamPlayer;
pub use stats::{AudioStats, BufferHealth};

/// Application-wide constants
pub mod constants {
    /// Default sample rate of the voice stream
    pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default Opus frame duration in milliseconds
    pub const DEFAULT_FRAME_DURATION_MS: u32 = 60;

    /// Samples in one 60 ms frame at 16 kHz
    pub const DEFAULT_FRAME_SIZE: usize = 960;

    /// Default sender bitrate in bits per second
    pub const DEFAULT_BITRATE: u32 = 16_000;

    /// Default sender complexity
    pub const DEFAULT_COMPLEXITY: u8 = 5;

    /// Playback starts once twice this much audio is buffered (seconds)
    pub const DEFAULT_MIN_AUDIO_DURATION: f64 = 0.12;

    /// Duration of one scheduled output unit (seconds)
    pub const DEFAULT_PLAY_CHUNK_SECS: f64 = 0.12;

    /// Frames collected before the first flush of a stream
    pub const DEFAULT_PREROLL_COUNT: usize = 6;

    /// Upper bound on the pre-roll wait
    pub const DEFAULT_PREROLL_TIMEOUT_MS: u64 = 400;

    /// Frames requested per steady-state drain
    pub const DEFAULT_DRAIN_COUNT: usize = 99;

    /// Steady-state drain timeout
    pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 30;

    /// Default UDP port for audio frames
    pub const DEFAULT_AUDIO_PORT: u16 = 5000;

    /// Default UDP port for control messages
    pub const DEFAULT_CONTROL_PORT: u16 = 5001;

    /// Receive buffer for one datagram; fits any UDP payload
    pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;
}
