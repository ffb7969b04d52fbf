pub mod service;

pub use service::{HealthSummary, OverallHealth, StatusService, SystemStatus};
