//! Opus codec wrapper
//!
//! Only the decode side lives here; frames arrive already encoded.

pub mod decoder;

pub use decoder::{DecoderFactory, DecoderStats, FrameDecoder, OpusDecoder};
