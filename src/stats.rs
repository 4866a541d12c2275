//! Queue statistics reported to the host

use serde::Serialize;

/// `pending_play` at or above which the buffer counts as full
const FULL_CHUNKS: usize = 10;

/// `pending_play` below which the buffer counts as low
const LOW_CHUNKS: usize = 5;

/// How much audio is still queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStats {
    /// Encoded frames not yet decoded
    pub pending_decode: usize,
    /// Decoded or scheduled audio not yet played, in stats frames
    pub pending_play: usize,
    pub total_pending: usize,
}

impl AudioStats {
    pub fn new(pending_decode: usize, pending_play: usize) -> Self {
        Self {
            pending_decode,
            pending_play,
            total_pending: pending_decode + pending_play,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_pending == 0
    }

    pub fn health(&self) -> BufferHealth {
        BufferHealth::from_pending_play(self.pending_play)
    }
}

/// Coarse buffer level for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferHealth {
    Empty,
    Low,
    Normal,
    Full,
}

impl BufferHealth {
    pub fn from_pending_play(pending_play: usize) -> Self {
        match pending_play {
            0 => BufferHealth::Empty,
            n if n < LOW_CHUNKS => BufferHealth::Low,
            n if n < FULL_CHUNKS => BufferHealth::Normal,
            _ => BufferHealth::Full,
        }
    }

    /// Fill level in [0, 1] for a gauge
    pub fn fill_fraction(pending_play: usize) -> f32 {
        pending_play.min(FULL_CHUNKS) as f32 / FULL_CHUNKS as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_is_sum() {
        let stats = AudioStats::new(3, 4);
        assert_eq!(stats.total_pending, 7);
        assert!(!stats.is_empty());
        assert!(AudioStats::default().is_empty());
    }

    #[test]
    fn test_health_levels() {
        assert_eq!(BufferHealth::from_pending_play(0), BufferHealth::Empty);
        assert_eq!(BufferHealth::from_pending_play(4), BufferHealth::Low);
        assert_eq!(BufferHealth::from_pending_play(5), BufferHealth::Normal);
        assert_eq!(BufferHealth::from_pending_play(10), BufferHealth::Full);
        assert_eq!(AudioStats::new(0, 12).health(), BufferHealth::Full);
    }

    #[test]
    fn test_fill_fraction_saturates() {
        assert_eq!(BufferHealth::fill_fraction(0), 0.0);
        assert_eq!(BufferHealth::fill_fraction(5), 0.5);
        assert_eq!(BufferHealth::fill_fraction(25), 1.0);
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(AudioStats::new(1, 2)).unwrap();
        assert_eq!(json["pendingDecode"], 1);
        assert_eq!(json["pendingPlay"], 2);
        assert_eq!(json["totalPending"], 3);
    }
}
