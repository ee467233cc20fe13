use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use harvester_core::{CronDriver, CronEntry, CronJob, EntryId, SchedulerResult};

use crate::cron_utils::{next_after, parse_cron};

/// 没有任何条目时的最长等待时间
const IDLE_WAIT: Duration = Duration::from_secs(3600);

struct Entry<J> {
    id: EntryId,
    spec: String,
    schedule: Schedule,
    next: Option<DateTime<Utc>>,
    job: Arc<J>,
    in_flight: Arc<AtomicUsize>,
}

struct Inner<J> {
    entries: Mutex<Vec<Entry<J>>>,
    next_id: AtomicU64,
    changed: Notify,
    started: AtomicBool,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl<J> Inner<J> {
    fn lock(&self) -> MutexGuard<'_, Vec<Entry<J>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 基于tokio的定时驱动, 时间均按UTC计算
///
/// 每次触发都会在独立的任务中执行, 同一条目的多次执行可能重叠.
pub struct TokioCron<J: CronJob> {
    inner: Arc<Inner<J>>,
}

impl<J: CronJob> TokioCron<J> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                changed: Notify::new(),
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// 触发所有到期的条目, 返回下一次需要唤醒的时间
    fn fire_due(inner: &Arc<Inner<J>>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut due = Vec::new();
        let mut earliest: Option<DateTime<Utc>> = None;
        {
            let mut entries = inner.lock();
            for entry in entries.iter_mut() {
                if matches!(entry.next, Some(next) if next <= now) {
                    due.push((entry.id, entry.spec.clone(), entry.job.clone(), entry.in_flight.clone()));
                    entry.next = next_after(&entry.schedule, now);
                }
                if let Some(next) = entry.next {
                    earliest = Some(earliest.map_or(next, |e| e.min(next)));
                }
            }
        }

        for (id, spec, job, in_flight) in due {
            let running = in_flight.fetch_add(1, Ordering::SeqCst);
            if running > 0 {
                debug!(entry = id, spec = %spec, running, "上一次执行尚未结束");
            }
            inner.tracker.spawn(async move {
                job.run().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
        earliest
    }

    async fn run_loop(inner: Arc<Inner<J>>) {
        info!("定时驱动已启动");
        loop {
            let now = Utc::now();
            let wait = match Self::fire_due(&inner, now) {
                Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO),
                None => IDLE_WAIT,
            };
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = inner.changed.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
        info!("定时驱动已停止");
    }
}

impl<J: CronJob> Default for TokioCron<J> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<J: CronJob> CronDriver<J> for TokioCron<J> {
    fn add_job(&self, spec: &str, job: J) -> SchedulerResult<EntryId> {
        let schedule = parse_cron(spec)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let next = next_after(&schedule, Utc::now());
        self.inner.lock().push(Entry {
            id,
            spec: spec.to_string(),
            schedule,
            next,
            job: Arc::new(job),
            in_flight: Arc::new(AtomicUsize::new(0)),
        });
        self.inner.changed.notify_one();
        Ok(id)
    }

    fn entries(&self) -> Vec<CronEntry<J>> {
        self.inner
            .lock()
            .iter()
            .map(|e| CronEntry {
                id: e.id,
                next: e.next,
                job: e.job.clone(),
            })
            .collect()
    }

    fn remove(&self, id: EntryId) {
        self.inner.lock().retain(|e| e.id != id);
        self.inner.changed.notify_one();
    }

    fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!("定时驱动已经在运行");
            return;
        }
        let inner = self.inner.clone();
        self.inner.tracker.spawn(Self::run_loop(inner));
    }

    async fn stop(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}
