//! 存储后端和进程级基础设施
//!
//! - [`MemoryDatabaseManager`]: 进程内保存的任务和测量历史
//! - [`MemoryCacheManager`] / [`RedisCacheManager`]: 任务状态和最新测量值
//! - [`logging::init_logging`]: tracing 订阅器初始化

pub mod cache;
pub mod database;
pub mod logging;

pub use cache::{MemoryCacheManager, RedisCacheManager};
pub use database::MemoryDatabaseManager;
