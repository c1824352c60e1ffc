//! Alert suppression
//!
//! This module provides:
//! - Muting by static label rules
//! - Deduplication of repeats within a cool-down window
//! - Flapping suppression of identities that recur too often
//! - The pipeline composing all three over a batch of alerts

mod dedup;
mod flapping;
mod mute;
mod pipeline;

pub use dedup::Deduplicator;
pub use flapping::FlappingSuppressor;
pub use mute::{MuteList, MuteRule};
pub use pipeline::{AlertFilterPipeline, Verdict};
