use std::sync::Arc;

use chrono::Duration;
use serde_json::json;

use harvester_core::{HarvestMode, SchedulerError, Status};
use harvester_dispatcher::{HarvestContext, HarvestJob, HarvestScheduler, HarvestSettings, JobService};
use harvester_testing_utils::{JobBuilder, MockCache, MockCron, MockDatabase, MockScript};

const JOB_A: &str = "0b8a5c52-8e1d-4c3b-a0f4-6d2e9b1c7a10";
const JOB_B: &str = "5f2d7e91-3a4c-4b6e-8d0f-1c9a2b3e4d50";

struct Fixture {
    service: JobService,
    cron: Arc<MockCron<HarvestJob>>,
    database: MockDatabase,
    cache: MockCache,
}

fn fixture(database: MockDatabase) -> Fixture {
    let script = MockScript::new(vec![]);
    let mut registry = script.registry("one", HarvestMode::OneByOne);
    script.register(&mut registry, "all", HarvestMode::AllAtOnce);
    let cache = MockCache::new();
    let context = HarvestContext {
        database: Arc::new(database.clone()),
        cache: Arc::new(cache.clone()),
        registry: Arc::new(registry),
        settings: HarvestSettings::default(),
    };
    let cron: Arc<MockCron<HarvestJob>> = Arc::new(MockCron::new());
    let scheduler = Arc::new(HarvestScheduler::new(cron.clone(), context));
    let service = JobService::new(scheduler, Arc::new(database.clone()), Arc::new(cache.clone()));
    Fixture {
        service,
        cron,
        database,
        cache,
    }
}

#[tokio::test]
async fn test_add_job_persists_and_schedules() {
    let f = fixture(MockDatabase::new());
    let job = JobBuilder::new()
        .with_id(JOB_A)
        .with_script("one")
        .with_gauges(3)
        .build();

    let added = f.service.add_job(job.clone()).await.unwrap();

    assert_eq!(added, job);
    assert_eq!(f.database.job_count(), 1);
    assert_eq!(f.cron.count(), 3);
    assert_eq!(f.service.get_job(JOB_A).await.unwrap(), job);
}

#[tokio::test]
async fn test_add_job_rolls_back_when_scheduling_fails() {
    let f = fixture(MockDatabase::new());
    let job = JobBuilder::new()
        .with_id(JOB_A)
        .with_script("all")
        .with_cron("not a cron")
        .with_gauges(3)
        .build();

    let err = f.service.add_job(job).await.unwrap_err();

    assert!(matches!(err, SchedulerError::InvalidCron { .. }));
    assert_eq!(f.database.job_count(), 0);
    assert_eq!(f.cron.count(), 0);
}

#[tokio::test]
async fn test_add_job_rejects_bad_id() {
    let f = fixture(MockDatabase::new());
    let job = JobBuilder::new()
        .with_id("not-a-uuid")
        .with_script("one")
        .with_gauges(1)
        .build();

    let err = f.service.add_job(job).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidJobId { .. }));
    assert_eq!(f.cron.count(), 0);
}

#[tokio::test]
async fn test_add_job_clears_input_status() {
    let f = fixture(MockDatabase::new());
    let mut job = JobBuilder::new()
        .with_id(JOB_A)
        .with_script("one")
        .with_gauges(1)
        .build();
    job.status = Some(Status::default());

    let added = f.service.add_job(job).await.unwrap();
    assert!(added.status.is_none());
}

#[tokio::test]
async fn test_delete_job_unschedules() {
    let f = fixture(MockDatabase::new());
    for id in [JOB_A, JOB_B] {
        let job = JobBuilder::new().with_id(id).with_script("one").with_gauges(2).build();
        f.service.add_job(job).await.unwrap();
    }
    assert_eq!(f.cron.count(), 4);

    f.service.delete_job(JOB_A).await.unwrap();
    assert_eq!(f.cron.count(), 2);
    assert_eq!(f.database.job_count(), 1);
    assert!(matches!(
        f.service.get_job(JOB_A).await,
        Err(SchedulerError::JobNotFound { .. })
    ));

    assert!(f.service.delete_job(JOB_A).await.is_err());
}

#[tokio::test]
async fn test_delete_keeps_job_when_not_scheduled() {
    let job = JobBuilder::new().with_id(JOB_A).with_script("one").with_gauges(2).build();
    let f = fixture(MockDatabase::with_jobs(vec![job]));

    let err = f.service.delete_job(JOB_A).await.unwrap_err();
    assert!(matches!(err, SchedulerError::JobNotScheduled { .. }));
    assert_eq!(f.database.job_count(), 1);
}

#[tokio::test]
async fn test_list_jobs_merges_statuses_and_next_runs() {
    let f = fixture(MockDatabase::new());
    for id in [JOB_A, JOB_B] {
        let job = JobBuilder::new().with_id(id).with_script("one").with_gauges(2).build();
        f.service.add_job(job).await.unwrap();
    }
    f.cache.set_job_status(
        JOB_B,
        Status {
            success: true,
            count: 12,
            ..Status::default()
        },
    );

    let jobs = f.service.list_jobs().await.unwrap();
    let base = MockCron::<HarvestJob>::base_time();

    let a = jobs.iter().find(|j| j.id == JOB_A).unwrap();
    let status = a.status.clone().unwrap();
    assert_eq!(status.next_run, Some(base + Duration::minutes(1)));
    assert!(!status.success);

    let b = jobs.iter().find(|j| j.id == JOB_B).unwrap();
    let status = b.status.clone().unwrap();
    assert_eq!(status.count, 12);
    assert_eq!(status.next_run, Some(base + Duration::minutes(3)));
}

#[tokio::test]
async fn test_job_gauges_merges_next_runs() {
    let f = fixture(MockDatabase::new());
    let job = JobBuilder::new().with_id(JOB_A).with_script("one").with_gauges(2).build();
    f.service.add_job(job).await.unwrap();
    f.cache.set_gauge_status(
        JOB_A,
        "g002",
        Status {
            success: false,
            error: Some("upstream down".to_string()),
            ..Status::default()
        },
    );

    let gauges = f.service.job_gauges(JOB_A).await.unwrap();
    let base = MockCron::<HarvestJob>::base_time();
    assert_eq!(gauges.len(), 2);
    assert_eq!(gauges["g001"].next_run, Some(base + Duration::minutes(1)));
    assert_eq!(gauges["g002"].next_run, Some(base + Duration::minutes(2)));
    assert_eq!(gauges["g002"].error.as_deref(), Some("upstream down"));
}

#[tokio::test]
async fn test_bootstrap_schedules_persisted_jobs() {
    let jobs = vec![
        JobBuilder::new().with_id(JOB_A).with_script("one").with_gauges(3).build(),
        JobBuilder::new()
            .with_id(JOB_B)
            .with_script("all")
            .with_options(json!({"tag": "x"}))
            .with_gauges(3)
            .build(),
    ];
    let f = fixture(MockDatabase::with_jobs(jobs));

    let count = f.service.bootstrap().await.unwrap();
    assert_eq!(count, 2);
    assert_eq!(f.cron.count(), 4);
}

#[tokio::test]
async fn test_bootstrap_fails_on_bad_job() {
    let jobs = vec![JobBuilder::new().with_id(JOB_A).with_script("gone").with_gauges(1).build()];
    let f = fixture(MockDatabase::with_jobs(jobs));

    assert!(matches!(
        f.service.bootstrap().await,
        Err(SchedulerError::ScriptNotFound { .. })
    ));
}
