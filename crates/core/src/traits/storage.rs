//! 存储层接口定义
//!
//! 此模块定义了采集服务依赖的两个持久化抽象:
//! - 数据库接口 (`DatabaseManager`) 保存任务定义和完整的测量历史
//! - 缓存接口 (`CacheManager`) 保存每个测站的最新测量值和任务状态
//!
//! ## 事务语义
//!
//! `add_job` 和 `delete_job` 接受一个同步回调. 实现必须在同一个事务内
//! 先写入存储, 再调用回调; 回调返回错误时整个操作回滚.
//! 调度器正是通过这个回调注册或注销定时任务.
//!
//! ## 流式写入
//!
//! 测量值以有界通道的形式传入, 实现应持续读取直到通道关闭或上下文被取消.
//! 被取消时返回 [`SchedulerError::Cancelled`](crate::SchedulerError::Cancelled).

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::channels::Stream;
use crate::models::{GaugeId, JobDescription, Measurement, Status, StringSet};
use crate::{SchedulerError, SchedulerResult};

/// 在存储事务内执行的回调
pub type JobCallback<'a> = &'a (dyn Fn(&JobDescription) -> SchedulerResult<()> + Send + Sync);

/// 删除任务时在存储事务内执行的回调
pub type JobIdCallback<'a> = &'a (dyn Fn(&str) -> SchedulerResult<()> + Send + Sync);

/// 数据库接口
#[async_trait]
pub trait DatabaseManager: Send + Sync {
    /// 列出所有任务, 按ID排序
    async fn list_jobs(&self) -> SchedulerResult<Vec<JobDescription>>;

    async fn get_job(&self, id: &str) -> SchedulerResult<Option<JobDescription>>;

    /// 保存任务并在同一事务中调用 `on_save`
    async fn add_job(&self, job: JobDescription, on_save: JobCallback<'_>) -> SchedulerResult<()>;

    /// 删除任务并在同一事务中调用 `on_delete`
    async fn delete_job(&self, id: &str, on_delete: JobIdCallback<'_>) -> SchedulerResult<()>;

    /// 保存测量值, 返回实际新增的条数
    async fn save_measurements(
        &self,
        ctx: CancellationToken,
        input: Stream<Measurement>,
    ) -> SchedulerResult<usize>;
}

/// 缓存接口
#[async_trait]
pub trait CacheManager: Send + Sync {
    /// 加载所有任务的状态, 以任务ID为键
    async fn load_job_statuses(&self) -> SchedulerResult<HashMap<String, Status>>;

    /// 加载某个任务下每个测站的状态, 以测站代码为键
    async fn load_gauge_statuses(&self, job_id: &str) -> SchedulerResult<HashMap<String, Status>>;

    /// 保存一次采集的结果. `code` 为空字符串表示整个任务的状态
    async fn save_status(
        &self,
        job_id: &str,
        code: &str,
        error: Option<&SchedulerError>,
        count: usize,
    ) -> SchedulerResult<()>;

    /// 按脚本加载最新测量值. 代码集合为空时加载该脚本的所有测站
    async fn load_latest_measurements(
        &self,
        from: &HashMap<String, StringSet>,
    ) -> SchedulerResult<HashMap<GaugeId, Measurement>>;

    /// 保存最新测量值, 每个测站只保留时间最新的一条
    async fn save_latest_measurements(
        &self,
        ctx: CancellationToken,
        input: Stream<Measurement>,
    ) -> SchedulerResult<()>;
}
