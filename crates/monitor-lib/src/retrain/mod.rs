//! Model retrain triggering
//!
//! A retrain fires either on a periodic timer or once enough anomaly events
//! land inside a trailing window. At most one retrain runs at a time; extra
//! triggers are dropped rather than queued.

mod scheduler;

pub use scheduler::{
    DropReason, RetrainCallback, RetrainConfig, RetrainOutcome, RetrainScheduler, RetrainState,
    RetrainStats, Trigger, RETRAIN_EVENT_KEY,
};
