use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::SchedulerResult;

/// 定时条目的标识
pub type EntryId = u64;

/// 由定时驱动在每次触发时执行的工作单元
#[async_trait]
pub trait CronJob: Send + Sync + 'static {
    async fn run(&self);
}

/// 定时驱动中的一个条目
#[derive(Debug)]
pub struct CronEntry<J> {
    pub id: EntryId,
    /// 下次触发时间
    pub next: Option<DateTime<Utc>>,
    pub job: Arc<J>,
}

impl<J> Clone for CronEntry<J> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            next: self.next,
            job: Arc::clone(&self.job),
        }
    }
}

/// 调度器注册定时条目所用的最小定时驱动接口
#[async_trait]
pub trait CronDriver<J: CronJob>: Send + Sync {
    fn add_job(&self, spec: &str, job: J) -> SchedulerResult<EntryId>;

    fn entries(&self) -> Vec<CronEntry<J>>;

    fn remove(&self, id: EntryId);

    fn start(&self);

    /// 停止触发新的执行, 并等待正在执行的任务结束
    async fn stop(&self);
}
