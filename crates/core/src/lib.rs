pub mod channels;
pub mod errors;
pub mod filters;
pub mod models;
pub mod scripts;
pub mod traits;

pub use errors::{SchedulerError, SchedulerResult};
pub use models::{
    Gauge, GaugeId, HarvestMode, JobDescription, Location, Measurement, Status, StringSet,
};
pub use scripts::{
    HttpClientOptions, ParsedOptions, Script, ScriptContext, ScriptDescriptor, ScriptInfo,
    ScriptLogger, ScriptOptions, ScriptRegistry,
};
pub use tokio_util::sync::CancellationToken;
pub use traits::{CacheManager, CronDriver, CronEntry, CronJob, DatabaseManager, EntryId};
