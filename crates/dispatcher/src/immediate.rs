use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::task::TaskTracker;
use tracing::debug;

use harvester_core::{CronDriver, CronEntry, CronJob, EntryId, SchedulerResult};

use crate::cron_utils::parse_cron;

/// 添加后立即派生一次执行的定时驱动, 不保留任何条目
///
/// `add_job` 把执行交给内部的 [`TaskTracker`] 后立即返回, 不等待执行结束;
/// `stop` 会等待所有已派生的执行结束. 用于一次性运行和端到端测试.
#[derive(Default)]
pub struct ImmediateCron {
    next_id: AtomicU64,
    tracker: TaskTracker,
}

impl ImmediateCron {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<J: CronJob> CronDriver<J> for ImmediateCron {
    fn add_job(&self, spec: &str, job: J) -> SchedulerResult<EntryId> {
        parse_cron(spec)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(spec, "立即执行定时条目");
        let job = Arc::new(job);
        self.tracker.spawn(async move { job.run().await });
        Ok(id)
    }

    fn entries(&self) -> Vec<CronEntry<J>> {
        Vec::new()
    }

    fn remove(&self, _id: EntryId) {}

    fn start(&self) {}

    async fn stop(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
