mod metric;
mod session;
mod website;

pub use metric::{CounterField, Metric, MetricEvent, MetricKind, WebsiteStats};
pub use session::{EngagementMetrics, Location, Session, SessionUpdate};
pub use website::{Notification, Website};
