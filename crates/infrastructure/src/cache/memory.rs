use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use harvester_core::channels::Stream;
use harvester_core::{
    CacheManager, GaugeId, Measurement, SchedulerError, SchedulerResult, Status, StringSet,
};

use super::layout;

type Hash = HashMap<String, String>;

/// 进程内缓存
///
/// 与 Redis 缓存使用相同的哈希布局, 适合单机运行和测试. 进程退出后数据丢失.
#[derive(Debug, Default)]
pub struct MemoryCacheManager {
    hashes: Mutex<HashMap<String, Hash>>,
}

impl MemoryCacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Hash>> {
        self.hashes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn load_statuses(&self, job_id: &str) -> SchedulerResult<HashMap<String, Status>> {
        let key = layout::statuses_key(job_id);
        match self.lock().get(&key) {
            Some(raw) => layout::parse_statuses(raw),
            None => Ok(HashMap::new()),
        }
    }
}

#[async_trait]
impl CacheManager for MemoryCacheManager {
    async fn load_job_statuses(&self) -> SchedulerResult<HashMap<String, Status>> {
        self.load_statuses("")
    }

    async fn load_gauge_statuses(&self, job_id: &str) -> SchedulerResult<HashMap<String, Status>> {
        self.load_statuses(job_id)
    }

    async fn save_status(
        &self,
        job_id: &str,
        code: &str,
        error: Option<&SchedulerError>,
        count: usize,
    ) -> SchedulerResult<()> {
        let (key, prefix) = layout::status_key(job_id, code);
        let fields = layout::status_fields(&prefix, error, count, Utc::now());
        self.lock().entry(key).or_default().extend(fields);
        Ok(())
    }

    async fn load_latest_measurements(
        &self,
        from: &HashMap<String, StringSet>,
    ) -> SchedulerResult<HashMap<GaugeId, Measurement>> {
        let hashes = self.lock();
        let mut result = HashMap::new();
        for (script, codes) in from {
            let Some(hash) = hashes.get(&layout::latest_key(script)) else {
                continue;
            };
            let raws: Vec<&String> = if codes.is_empty() {
                hash.values().collect()
            } else {
                codes.iter().filter_map(|code| hash.get(code)).collect()
            };
            for raw in raws {
                let m: Measurement = serde_json::from_str(raw)?;
                result.insert(m.gauge_id.clone(), m);
            }
        }
        Ok(result)
    }

    async fn save_latest_measurements(
        &self,
        ctx: CancellationToken,
        input: Stream<Measurement>,
    ) -> SchedulerResult<()> {
        let newest = layout::newest_per_gauge(&ctx, input).await?;
        let mut encoded = Vec::with_capacity(newest.len());
        for (id, m) in newest {
            encoded.push((id, serde_json::to_string(&m)?));
        }
        debug!("保存 {} 个测站的最新测量值", encoded.len());

        let mut hashes = self.lock();
        for (id, raw) in encoded {
            hashes
                .entry(layout::latest_key(&id.script))
                .or_default()
                .insert(id.code, raw);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use harvester_core::channels::generate_from;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn m(script: &str, code: &str, hour: u32) -> Measurement {
        Measurement::new(GaugeId::new(script, code), at(hour), Some(hour as f64), None)
    }

    async fn save(cache: &MemoryCacheManager, items: Vec<Measurement>) {
        let ctx = CancellationToken::new();
        let input = generate_from(&ctx, items);
        cache.save_latest_measurements(ctx, input).await.unwrap();
    }

    #[tokio::test]
    async fn test_status_round_trip() {
        let cache = MemoryCacheManager::new();
        cache.save_status("job", "", None, 4).await.unwrap();
        cache
            .save_status("job", "g1", Some(&SchedulerError::Timeout), 0)
            .await
            .unwrap();

        let jobs = cache.load_job_statuses().await.unwrap();
        assert!(jobs["job"].success);
        assert_eq!(jobs["job"].count, 4);
        assert!(jobs["job"].last_success.is_some());

        let gauges = cache.load_gauge_statuses("job").await.unwrap();
        assert!(!gauges["g1"].success);
        assert_eq!(gauges["g1"].last_success, None);
        assert!(!jobs.contains_key("g1"));

        assert!(cache.load_gauge_statuses("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_keeps_last_success() {
        let cache = MemoryCacheManager::new();
        cache.save_status("job", "", None, 2).await.unwrap();
        let before = cache.load_job_statuses().await.unwrap()["job"].last_success;

        cache
            .save_status("job", "", Some(&SchedulerError::harvest("down")), 0)
            .await
            .unwrap();
        let status = cache.load_job_statuses().await.unwrap()["job"].clone();
        assert_eq!(status.last_success, before);
        assert_eq!(status.count, 0);
        assert!(status.error.unwrap().contains("down"));

        cache.save_status("job", "", None, 1).await.unwrap();
        let status = cache.load_job_statuses().await.unwrap()["job"].clone();
        assert_eq!(status.error, None);
        assert!(status.success);
    }

    #[tokio::test]
    async fn test_latest_keeps_newest_per_gauge() {
        let cache = MemoryCacheManager::new();
        save(&cache, vec![m("s", "a", 2), m("s", "a", 5), m("s", "b", 1)]).await;
        save(&cache, vec![m("s", "a", 3)]).await;

        let mut from = HashMap::new();
        from.insert("s".to_string(), StringSet::new());
        let latest = cache.load_latest_measurements(&from).await.unwrap();
        assert_eq!(latest.len(), 2);
        // a later save overwrites the stored value even when it is older
        assert_eq!(latest[&GaugeId::new("s", "a")].timestamp, at(3));
    }

    #[tokio::test]
    async fn test_latest_by_codes() {
        let cache = MemoryCacheManager::new();
        save(&cache, vec![m("s", "a", 1), m("s", "b", 1), m("t", "a", 1)]).await;

        let mut from = HashMap::new();
        from.insert("s".to_string(), ["b", "missing"].into_iter().collect::<StringSet>());
        from.insert("unknown".to_string(), StringSet::new());
        let latest = cache.load_latest_measurements(&from).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert!(latest.contains_key(&GaugeId::new("s", "b")));
    }

    #[tokio::test]
    async fn test_latest_skips_empty_values() {
        let cache = MemoryCacheManager::new();
        let empty = Measurement::new(GaugeId::new("s", "a"), at(9), None, None);
        save(&cache, vec![m("s", "a", 1), empty]).await;

        let mut from = HashMap::new();
        from.insert("s".to_string(), StringSet::new());
        let latest = cache.load_latest_measurements(&from).await.unwrap();
        assert_eq!(latest[&GaugeId::new("s", "a")].timestamp, at(1));
    }
}
