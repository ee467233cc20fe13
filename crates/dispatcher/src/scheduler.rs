use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use harvester_core::{
    CronDriver, EntryId, HarvestMode, JobDescription, SchedulerError, SchedulerResult, StringSet,
};

use crate::batching::plan_batches;
use crate::cron_utils::parse_cron;
use crate::harvest_job::{HarvestContext, HarvestJob};

/// 把任务展开为定时条目并注册到定时驱动
///
/// 定时条目本身携带任务ID和测站代码, 删除和查询下次执行时间都是通过扫描条目完成的.
pub struct HarvestScheduler {
    cron: Arc<dyn CronDriver<HarvestJob>>,
    context: HarvestContext,
}

impl HarvestScheduler {
    pub fn new(cron: Arc<dyn CronDriver<HarvestJob>>, context: HarvestContext) -> Self {
        Self { cron, context }
    }

    pub fn add_job(&self, description: &JobDescription) -> SchedulerResult<()> {
        let registry = &self.context.registry;
        let mode = registry.get_mode(&description.script)?;
        if description.gauges.is_empty() {
            return Err(SchedulerError::EmptyGauges {
                job_id: description.id.clone(),
            });
        }

        match mode {
            HarvestMode::AllAtOnce => self.add_all_at_once(description),
            HarvestMode::OneByOne => self.add_batches(description, 1),
            HarvestMode::Batched => {
                let options = registry.parse_json_options(&description.script, &[&description.options])?;
                let batch_size = options.batch_size().ok_or_else(|| SchedulerError::InvalidOptions {
                    script: description.script.clone(),
                    message: "批量脚本必须提供批次大小".to_string(),
                })?;
                self.add_batches(description, batch_size)
            }
        }
    }

    fn add_all_at_once(&self, description: &JobDescription) -> SchedulerResult<()> {
        parse_cron(&description.cron)?;
        let options = self
            .context
            .registry
            .parse_json_options(&description.script, &[&description.options])?;
        let job = HarvestJob::new(
            self.context.clone(),
            description.id.as_str(),
            description.cron.as_str(),
            description.script.as_str(),
            description.gauge_codes(),
            options,
        );
        self.cron.add_job(&description.cron, job)?;
        debug!(job_id = %description.id, cron = %description.cron, "已注册定时条目");
        Ok(())
    }

    /// 注册所有批次, 任何一批失败时撤销已注册的条目
    fn add_batches(&self, description: &JobDescription, batch_size: usize) -> SchedulerResult<()> {
        let batches = plan_batches(&description.gauge_codes(), batch_size)?;
        let mut added: Vec<EntryId> = Vec::with_capacity(batches.len());

        let result = batches.iter().try_for_each(|batch| {
            // 只使用每批第一个测站的参数
            let gauge_options = batch
                .codes
                .first()
                .and_then(|code| description.gauges.get(code))
                .unwrap_or(&serde_json::Value::Null);
            let options = self
                .context
                .registry
                .parse_json_options(&description.script, &[&description.options, gauge_options])?;
            let cron = batch.cron();
            let codes: StringSet = batch.codes.iter().cloned().collect();
            let job = HarvestJob::new(
                self.context.clone(),
                description.id.as_str(),
                cron.as_str(),
                description.script.as_str(),
                codes,
                options,
            );
            let id = self.cron.add_job(&cron, job)?;
            added.push(id);
            Ok::<(), SchedulerError>(())
        });

        if let Err(e) = result {
            warn!(job_id = %description.id, error = %e, rolled_back = added.len(), "注册批次失败, 回滚");
            for id in added {
                self.cron.remove(id);
            }
            return Err(e);
        }
        debug!(job_id = %description.id, entries = added.len(), "已注册定时条目");
        Ok(())
    }

    pub fn delete_job(&self, job_id: &str) -> SchedulerResult<()> {
        let mut removed = false;
        for entry in self.cron.entries() {
            if entry.job.job_id == job_id {
                self.cron.remove(entry.id);
                debug!(job_id, cron = %entry.job.cron, "已删除定时条目");
                removed = true;
            }
        }
        if removed {
            Ok(())
        } else {
            Err(SchedulerError::JobNotScheduled {
                job_id: job_id.to_string(),
            })
        }
    }

    /// 查询下次执行时间
    ///
    /// `job_id` 为空时返回每个任务最早的下次执行时间, 以任务ID为键;
    /// 否则返回该任务中每个单测站条目的下次执行时间, 以测站代码为键.
    pub fn list_next(&self, job_id: &str) -> HashMap<String, DateTime<Utc>> {
        let mut result: HashMap<String, DateTime<Utc>> = HashMap::new();
        for entry in self.cron.entries() {
            let Some(next) = entry.next else {
                continue;
            };
            let job = &entry.job;
            if job_id.is_empty() {
                result
                    .entry(job.job_id.clone())
                    .and_modify(|current| {
                        if next < *current {
                            *current = next;
                        }
                    })
                    .or_insert(next);
            } else if job.job_id == job_id {
                if let Ok(code) = job.codes.only() {
                    result.insert(code.to_string(), next);
                }
            }
        }
        result
    }

    pub fn start(&self) {
        info!("启动采集调度器");
        self.cron.start();
    }

    /// 停止调度并等待正在执行的采集结束
    pub async fn stop(&self) {
        info!("停止采集调度器");
        self.cron.stop().await;
    }
}
