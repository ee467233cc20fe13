pub mod app_config;
pub mod logging;
pub mod scheduler;
pub mod storage;

pub use app_config::AppConfig;
pub use logging::{LogConfig, LogLevel, OutputFormat};
pub use scheduler::{HttpConfig, SchedulerConfig};
pub use storage::{CacheConfig, CacheKind, DatabaseConfig, DatabaseKind};
