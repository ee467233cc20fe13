//! 采集调度
//!
//! 把任务定义转换成定时条目, 每次触发时运行采集流水线,
//! 并保持持久化的任务与调度表一致.

pub mod batching;
pub mod cron_utils;
pub mod harvest_job;
pub mod immediate;
pub mod scheduler;
pub mod service;
pub mod tokio_cron;
pub mod upstream;

pub use harvest_job::{HarvestContext, HarvestJob, HarvestSettings};
pub use immediate::ImmediateCron;
pub use scheduler::HarvestScheduler;
pub use service::JobService;
pub use tokio_cron::TokioCron;
pub use upstream::{harvest_now, list_gauges_now};
