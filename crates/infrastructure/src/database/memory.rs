use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use harvester_core::channels::Stream;
use harvester_core::traits::{JobCallback, JobIdCallback};
use harvester_core::{
    DatabaseManager, GaugeId, JobDescription, Measurement, SchedulerError, SchedulerResult,
};

type MeasurementKey = (GaugeId, DateTime<Utc>);

#[derive(Debug, Default)]
struct Tables {
    jobs: BTreeMap<String, JobDescription>,
    measurements: BTreeMap<MeasurementKey, Measurement>,
}

/// 内存数据库
///
/// 任务和测量历史都保存在进程内. 任务的增删在持有锁期间调用回调,
/// 回调失败时撤销本次修改, 相当于一个串行化的事务.
#[derive(Debug, Default)]
pub struct MemoryDatabaseManager {
    tables: Mutex<Tables>,
}

impl MemoryDatabaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 从 JSON 文件导入任务定义 (一个任务数组), 不做调度
    ///
    /// 已存在的任务ID会导致整个导入失败, 此时不写入任何任务.
    pub async fn load_jobs_file(&self, path: impl AsRef<Path>) -> SchedulerResult<usize> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            SchedulerError::database(format!("读取任务文件 {} 失败: {e}", path.display()))
        })?;
        let jobs: Vec<JobDescription> = serde_json::from_str(&raw)?;

        let mut tables = self.lock();
        let mut staged = BTreeMap::new();
        for mut job in jobs {
            job.validate_id()?;
            if tables.jobs.contains_key(&job.id) || staged.contains_key(&job.id) {
                return Err(SchedulerError::JobExists { id: job.id });
            }
            job.status = None;
            staged.insert(job.id.clone(), job);
        }
        let count = staged.len();
        tables.jobs.extend(staged);
        info!("从 {} 导入了 {} 个任务", path.display(), count);
        Ok(count)
    }

    /// 按测站升序, 时间降序返回所有测量值
    pub fn measurements(&self) -> Vec<Measurement> {
        let mut items: Vec<Measurement> = self.lock().measurements.values().cloned().collect();
        items.sort_by(Measurement::display_order);
        items
    }
}

#[async_trait]
impl DatabaseManager for MemoryDatabaseManager {
    async fn list_jobs(&self) -> SchedulerResult<Vec<JobDescription>> {
        Ok(self.lock().jobs.values().cloned().collect())
    }

    async fn get_job(&self, id: &str) -> SchedulerResult<Option<JobDescription>> {
        Ok(self.lock().jobs.get(id).cloned())
    }

    async fn add_job(&self, job: JobDescription, on_save: JobCallback<'_>) -> SchedulerResult<()> {
        let mut tables = self.lock();
        if tables.jobs.contains_key(&job.id) {
            return Err(SchedulerError::JobExists { id: job.id });
        }
        let id = job.id.clone();
        tables.jobs.insert(id.clone(), job);
        let saved = &tables.jobs[&id];
        if let Err(e) = on_save(saved) {
            tables.jobs.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    async fn delete_job(&self, id: &str, on_delete: JobIdCallback<'_>) -> SchedulerResult<()> {
        let mut tables = self.lock();
        let Some(removed) = tables.jobs.remove(id) else {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        };
        if let Err(e) = on_delete(id) {
            tables.jobs.insert(removed.id.clone(), removed);
            return Err(e);
        }
        Ok(())
    }

    async fn save_measurements(
        &self,
        ctx: CancellationToken,
        mut input: Stream<Measurement>,
    ) -> SchedulerResult<usize> {
        let mut inserted = 0;
        loop {
            let next = tokio::select! {
                _ = ctx.cancelled() => return Err(SchedulerError::Cancelled),
                next = input.recv() => next,
            };
            let Some(m) = next else {
                break;
            };
            if !m.has_value() {
                continue;
            }
            let key = (m.gauge_id.clone(), m.timestamp);
            let mut tables = self.lock();
            if !tables.measurements.contains_key(&key) {
                tables.measurements.insert(key, m);
                inserted += 1;
            }
        }
        debug!("新增 {} 条测量值", inserted);
        Ok(inserted)
    }
}
