//! Recording mock implementations of the cron, storage and script traits
//!
//! Every mock keeps its state behind `Arc<Mutex<..>>` so clones share it and
//! tests can inspect what the code under test did.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::Span;

use harvester_core::channels::Stream;
use harvester_core::traits::{JobCallback, JobIdCallback};
use harvester_core::{
    CacheManager, CancellationToken, CronDriver, CronEntry, CronJob, DatabaseManager, EntryId,
    Gauge, GaugeId, HarvestMode, JobDescription, Measurement, SchedulerError, SchedulerResult,
    Script, ScriptContext, ScriptDescriptor, ScriptLogger, ScriptOptions, ScriptRegistry, Status,
    StringSet,
};

/// Mock cron driver that records entries without ever firing them
///
/// `next` of the n-th entry is `2024-01-01T00:00Z` plus n minutes.
pub struct MockCron<J> {
    entries: Arc<Mutex<Vec<(CronEntry<J>, String)>>>,
    next_id: AtomicU64,
    fail_on: Mutex<Option<usize>>,
    added: Mutex<usize>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl<J> MockCron<J> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
            fail_on: Mutex::new(None),
            added: Mutex::new(0),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Makes the `n`-th call (0-based) to `add_job` fail
    pub fn fail_on_add(&self, n: usize) {
        *self.fail_on.lock().unwrap() = Some(n);
    }

    pub fn specs(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, spec)| spec.clone())
            .collect()
    }

    pub fn jobs(&self) -> Vec<Arc<J>> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(e, _)| e.job.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }
}

impl<J> Default for MockCron<J> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<J: CronJob> CronDriver<J> for MockCron<J> {
    fn add_job(&self, spec: &str, job: J) -> SchedulerResult<EntryId> {
        let mut added = self.added.lock().unwrap();
        let call = *added;
        *added += 1;
        if *self.fail_on.lock().unwrap() == Some(call) {
            return Err(SchedulerError::Schedule(format!("mock cron rejected '{spec}'")));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let next = Self::base_time() + chrono::Duration::minutes(id as i64);
        self.entries.lock().unwrap().push((
            CronEntry {
                id,
                next: Some(next),
                job: Arc::new(job),
            },
            spec.to_string(),
        ));
        Ok(id)
    }

    fn entries(&self) -> Vec<CronEntry<J>> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(e, _)| e.clone())
            .collect()
    }

    fn remove(&self, id: EntryId) {
        self.entries.lock().unwrap().retain(|(e, _)| e.id != id);
    }

    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Mock database keeping jobs and measurements in memory
#[derive(Clone, Default)]
pub struct MockDatabase {
    jobs: Arc<Mutex<BTreeMap<String, JobDescription>>>,
    measurements: Arc<Mutex<Vec<Measurement>>>,
    save_error: Arc<Mutex<Option<String>>>,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: Vec<JobDescription>) -> Self {
        let db = Self::new();
        {
            let mut map = db.jobs.lock().unwrap();
            for job in jobs {
                map.insert(job.id.clone(), job);
            }
        }
        db
    }

    /// Makes every following `save_measurements` call fail with `message`
    pub fn fail_saves(&self, message: &str) {
        *self.save_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn saved_measurements(&self) -> Vec<Measurement> {
        self.measurements.lock().unwrap().clone()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

#[async_trait]
impl DatabaseManager for MockDatabase {
    async fn list_jobs(&self) -> SchedulerResult<Vec<JobDescription>> {
        Ok(self.jobs.lock().unwrap().values().cloned().collect())
    }

    async fn get_job(&self, id: &str) -> SchedulerResult<Option<JobDescription>> {
        Ok(self.jobs.lock().unwrap().get(id).cloned())
    }

    async fn add_job(&self, job: JobDescription, on_save: JobCallback<'_>) -> SchedulerResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(SchedulerError::JobExists { id: job.id });
        }
        on_save(&job)?;
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn delete_job(&self, id: &str, on_delete: JobIdCallback<'_>) -> SchedulerResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if !jobs.contains_key(id) {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        on_delete(id)?;
        jobs.remove(id);
        Ok(())
    }

    async fn save_measurements(
        &self,
        _ctx: CancellationToken,
        mut input: Stream<Measurement>,
    ) -> SchedulerResult<usize> {
        let save_error = self.save_error.lock().unwrap().clone();
        if let Some(message) = save_error {
            drop(input);
            return Err(SchedulerError::database(message));
        }
        let mut count = 0;
        while let Some(m) = input.recv().await {
            self.measurements.lock().unwrap().push(m);
            count += 1;
        }
        Ok(count)
    }
}

/// One call to [`CacheManager::save_status`]
#[derive(Debug, Clone, PartialEq)]
pub struct SavedStatus {
    pub job_id: String,
    pub code: String,
    pub error: Option<String>,
    pub count: usize,
}

/// Mock cache recording statuses and latest measurements
#[derive(Clone, Default)]
pub struct MockCache {
    latest: Arc<Mutex<HashMap<GaugeId, Measurement>>>,
    statuses: Arc<Mutex<Vec<SavedStatus>>>,
    job_statuses: Arc<Mutex<HashMap<String, Status>>>,
    gauge_statuses: Arc<Mutex<HashMap<String, HashMap<String, Status>>>>,
    fail_load: Arc<AtomicBool>,
    save_error: Arc<Mutex<Option<String>>>,
}

impl MockCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latest(measurements: Vec<Measurement>) -> Self {
        let cache = Self::new();
        {
            let mut latest = cache.latest.lock().unwrap();
            for m in measurements {
                latest.insert(m.gauge_id.clone(), m);
            }
        }
        cache
    }

    pub fn fail_loads(&self) {
        self.fail_load.store(true, Ordering::SeqCst);
    }

    pub fn fail_saves(&self, message: &str) {
        *self.save_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_job_status(&self, job_id: &str, status: Status) {
        self.job_statuses
            .lock()
            .unwrap()
            .insert(job_id.to_string(), status);
    }

    pub fn set_gauge_status(&self, job_id: &str, code: &str, status: Status) {
        self.gauge_statuses
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default()
            .insert(code.to_string(), status);
    }

    pub fn saved_statuses(&self) -> Vec<SavedStatus> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn latest(&self) -> HashMap<GaugeId, Measurement> {
        self.latest.lock().unwrap().clone()
    }
}

#[async_trait]
impl CacheManager for MockCache {
    async fn load_job_statuses(&self) -> SchedulerResult<HashMap<String, Status>> {
        Ok(self.job_statuses.lock().unwrap().clone())
    }

    async fn load_gauge_statuses(&self, job_id: &str) -> SchedulerResult<HashMap<String, Status>> {
        Ok(self
            .gauge_statuses
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_status(
        &self,
        job_id: &str,
        code: &str,
        error: Option<&SchedulerError>,
        count: usize,
    ) -> SchedulerResult<()> {
        self.statuses.lock().unwrap().push(SavedStatus {
            job_id: job_id.to_string(),
            code: code.to_string(),
            error: error.map(|e| e.to_string()),
            count,
        });
        Ok(())
    }

    async fn load_latest_measurements(
        &self,
        from: &HashMap<String, StringSet>,
    ) -> SchedulerResult<HashMap<GaugeId, Measurement>> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(SchedulerError::cache("mock cache load failure"));
        }
        let latest = self.latest.lock().unwrap();
        Ok(latest
            .iter()
            .filter(|(id, _)| {
                from.get(&id.script)
                    .is_some_and(|codes| codes.is_empty() || codes.contains(&id.code))
            })
            .map(|(id, m)| (id.clone(), m.clone()))
            .collect())
    }

    async fn save_latest_measurements(
        &self,
        _ctx: CancellationToken,
        mut input: Stream<Measurement>,
    ) -> SchedulerResult<()> {
        let save_error = self.save_error.lock().unwrap().clone();
        if let Some(message) = save_error {
            drop(input);
            return Err(SchedulerError::cache(message));
        }
        while let Some(m) = input.recv().await {
            let mut latest = self.latest.lock().unwrap();
            let newer = latest
                .get(&m.gauge_id)
                .map_or(true, |known| known.timestamp < m.timestamp);
            if newer {
                latest.insert(m.gauge_id.clone(), m);
            }
        }
        Ok(())
    }
}

/// Arguments of one [`Script::harvest`] call
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestCall {
    pub codes: StringSet,
    pub since: i64,
}

/// Options understood by [`MockScript`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct MockOptions {
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub fail_create: bool,
    #[serde(default)]
    pub panic_on_create: bool,
    #[serde(default)]
    pub tag: Option<String>,
}

impl ScriptOptions for MockOptions {
    fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }
}

/// Scripted upstream that emits a fixed list of measurements
#[derive(Clone, Default)]
pub struct MockScript {
    pub gauges: Vec<Gauge>,
    pub measurements: Vec<Measurement>,
    pub error: Option<String>,
    pub delay: Option<Duration>,
    /// Panics after all measurements were sent
    pub panic_after_send: bool,
    calls: Arc<Mutex<Vec<HarvestCall>>>,
    options: Arc<Mutex<Vec<MockOptions>>>,
    logger: ScriptLogger,
}

impl MockScript {
    pub fn new(measurements: Vec<Measurement>) -> Self {
        Self {
            measurements,
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_panic_after_send(mut self) -> Self {
        self.panic_after_send = true;
        self
    }

    pub fn with_gauges(mut self, gauges: Vec<Gauge>) -> Self {
        self.gauges = gauges;
        self
    }

    pub fn calls(&self) -> Vec<HarvestCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Options every instance was created with, in creation order
    pub fn created_with(&self) -> Vec<MockOptions> {
        self.options.lock().unwrap().clone()
    }

    /// Registry with this script registered as `name`
    pub fn registry(&self, name: &str, mode: HarvestMode) -> ScriptRegistry {
        let mut registry = ScriptRegistry::new(ScriptContext::default());
        self.register(&mut registry, name, mode);
        registry
    }

    pub fn register(&self, registry: &mut ScriptRegistry, name: &str, mode: HarvestMode) {
        let template = self.clone();
        let descriptor = ScriptDescriptor::new(
            name,
            "mock script",
            mode,
            move |_: &ScriptContext, _: &str, options: &MockOptions| {
                if options.panic_on_create {
                    panic!("mock script panicked on create");
                }
                if options.fail_create {
                    return Err(SchedulerError::harvest("mock script rejected options"));
                }
                template.options.lock().unwrap().push(options.clone());
                Ok(Box::new(template.clone()) as Box<dyn Script>)
            },
        )
        .unwrap();
        registry.register(descriptor);
    }
}

#[async_trait]
impl Script for MockScript {
    async fn list_gauges(&self) -> SchedulerResult<Vec<Gauge>> {
        match &self.error {
            Some(e) => Err(SchedulerError::harvest(e.clone())),
            None => Ok(self.gauges.clone()),
        }
    }

    async fn harvest(
        &self,
        ctx: CancellationToken,
        values: mpsc::Sender<Measurement>,
        errors: mpsc::Sender<SchedulerError>,
        codes: StringSet,
        since: i64,
    ) {
        self.calls.lock().unwrap().push(HarvestCall { codes, since });
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        for m in &self.measurements {
            tokio::select! {
                _ = ctx.cancelled() => return,
                sent = values.send(m.clone()) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
        if self.panic_after_send {
            panic!("mock script panicked during harvest");
        }
        if let Some(e) = &self.error {
            let _ = errors.send(SchedulerError::harvest(e.clone())).await;
        }
    }

    fn set_span(&mut self, span: Span) {
        self.logger.set(span);
    }

    fn span(&self) -> Span {
        self.logger.get()
    }
}
