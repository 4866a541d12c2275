//! Pipeline stages
//!
//! Ingestion, decode and scheduling each run as their own tokio task and
//! talk only through the queues in [`PipelineShared`].

pub mod decode;
pub mod ingest;
pub mod scheduler;
pub mod shared;

pub use decode::{pcm_to_f32, DecodeStage};
pub use ingest::{FrameIngestion, PrerollOutcome};
pub use scheduler::PlaybackScheduler;
pub use shared::{PipelineShared, PlaybackState, SchedulerState};
