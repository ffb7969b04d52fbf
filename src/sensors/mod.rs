pub mod classifier;
pub mod service;

pub use service::{NewReading, RecordedReading, SensorService};
