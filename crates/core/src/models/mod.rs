pub mod gauge;
pub mod job;
pub mod measurement;
pub mod string_set;

pub use gauge::{Gauge, GaugeId, Location};
pub use job::{HarvestMode, JobDescription, Status};
pub use measurement::Measurement;
pub use string_set::StringSet;
