//! Library for the anomaly monitor
//!
//! This crate provides the core functionality for:
//! - Sliding window event counting
//! - Alert suppression (muting, deduplication, flapping)
//! - Periodic and event-driven model retrain triggering
//! - Alert delivery, health checks and observability

pub mod error;
pub mod health;
pub mod instrument;
pub mod models;
pub mod observability;
pub mod retrain;
pub mod settings;
pub mod sink;
pub mod suppression;
pub mod window;

pub use error::ConfigError;
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
pub use retrain::{RetrainConfig, RetrainOutcome, RetrainScheduler};
pub use settings::MonitorSettings;
pub use suppression::{AlertFilterPipeline, Deduplicator, FlappingSuppressor, MuteList, MuteRule};
pub use window::SlidingWindowCounter;
