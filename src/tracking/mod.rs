//! Real-time engagement tracking
//!
//! - [`SessionTracker`]: who is active on each website right now
//! - [`MetricRecorder`]: impression/click recording with dedup and counter updates
//! - [`EngagementAggregator`]: per-website stats snapshots built from live sessions

pub mod aggregator;
pub mod recorder;
pub mod sessions;

pub use aggregator::EngagementAggregator;
pub use recorder::MetricRecorder;
pub use sessions::{SessionTracker, SESSION_TIMEOUT};
