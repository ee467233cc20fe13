use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use harvester_core::{
    CacheManager, DatabaseManager, JobDescription, SchedulerError, SchedulerResult, Status,
};

use crate::scheduler::HarvestScheduler;

/// 协调持久化任务和调度器的服务
///
/// 增删任务时, 调度器的注册或注销在数据库事务内执行, 两者一起提交或回滚.
pub struct JobService {
    scheduler: Arc<HarvestScheduler>,
    database: Arc<dyn DatabaseManager>,
    cache: Arc<dyn CacheManager>,
}

impl JobService {
    pub fn new(
        scheduler: Arc<HarvestScheduler>,
        database: Arc<dyn DatabaseManager>,
        cache: Arc<dyn CacheManager>,
    ) -> Self {
        Self {
            scheduler,
            database,
            cache,
        }
    }

    pub fn scheduler(&self) -> &Arc<HarvestScheduler> {
        &self.scheduler
    }

    #[instrument(skip(self, description), fields(job_id = %description.id, script = %description.script))]
    pub async fn add_job(&self, mut description: JobDescription) -> SchedulerResult<JobDescription> {
        description.validate_id()?;
        description.status = None;
        let scheduler = &self.scheduler;
        self.database
            .add_job(description.clone(), &|job: &JobDescription| scheduler.add_job(job))
            .await?;
        info!(codes = %description.gauge_codes(), "已添加任务");
        Ok(description)
    }

    #[instrument(skip(self))]
    pub async fn delete_job(&self, job_id: &str) -> SchedulerResult<()> {
        let scheduler = &self.scheduler;
        self.database
            .delete_job(job_id, &|id: &str| scheduler.delete_job(id))
            .await?;
        info!("已删除任务");
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> SchedulerResult<JobDescription> {
        self.database
            .get_job(job_id)
            .await?
            .ok_or_else(|| SchedulerError::JobNotFound {
                id: job_id.to_string(),
            })
    }

    /// 列出所有任务, 附带最近一次执行状态和下次执行时间
    pub async fn list_jobs(&self) -> SchedulerResult<Vec<JobDescription>> {
        let mut jobs = self.database.list_jobs().await?;
        let statuses = self.cache.load_job_statuses().await?;
        let next_runs = self.scheduler.list_next("");
        for job in &mut jobs {
            let mut status = statuses.get(&job.id).cloned();
            if let Some(next) = next_runs.get(&job.id) {
                status.get_or_insert_with(Status::default).next_run = Some(*next);
            }
            job.status = status;
        }
        Ok(jobs)
    }

    /// 任务中每个测站的状态, 以测站代码为键
    pub async fn job_gauges(&self, job_id: &str) -> SchedulerResult<HashMap<String, Status>> {
        let mut statuses = self.cache.load_gauge_statuses(job_id).await?;
        for (code, next) in self.scheduler.list_next(job_id) {
            statuses.entry(code).or_default().next_run = Some(next);
        }
        Ok(statuses)
    }

    /// 启动时调度所有已保存的任务
    pub async fn bootstrap(&self) -> SchedulerResult<usize> {
        let jobs = self.database.list_jobs().await?;
        for job in &jobs {
            if let Err(e) = self.scheduler.add_job(job) {
                warn!(job_id = %job.id, error = %e, "调度已保存的任务失败");
                return Err(e);
            }
        }
        info!(count = jobs.len(), "已调度所有保存的任务");
        Ok(jobs.len())
    }
}
