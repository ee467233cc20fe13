//! Redis 缓存实现

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use harvester_core::channels::Stream;
use harvester_core::{
    CacheManager, GaugeId, Measurement, SchedulerError, SchedulerResult, Status, StringSet,
};

use super::layout;

fn cache_error(e: redis::RedisError) -> SchedulerError {
    SchedulerError::cache(e.to_string())
}

/// 基于 Redis 的任务状态和最新测量值缓存
#[derive(Clone)]
pub struct RedisCacheManager {
    conn: ConnectionManager,
}

impl RedisCacheManager {
    /// 连接 `redis_url` 并用 PING 验证连接
    pub async fn new(redis_url: &str) -> SchedulerResult<Self> {
        info!("Creating Redis cache manager with URL: {}", redis_url);

        let client = redis::Client::open(redis_url).map_err(cache_error)?;
        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(cache_error)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;

        info!("Redis cache manager created successfully");
        Ok(Self { conn })
    }

    async fn load_statuses(&self, job_id: &str) -> SchedulerResult<HashMap<String, Status>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(layout::statuses_key(job_id))
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;
        layout::parse_statuses(&raw)
    }
}

#[async_trait]
impl CacheManager for RedisCacheManager {
    async fn load_job_statuses(&self) -> SchedulerResult<HashMap<String, Status>> {
        self.load_statuses("").await
    }

    async fn load_gauge_statuses(&self, job_id: &str) -> SchedulerResult<HashMap<String, Status>> {
        self.load_statuses(job_id).await
    }

    #[instrument(skip(self, error))]
    async fn save_status(
        &self,
        job_id: &str,
        code: &str,
        error: Option<&SchedulerError>,
        count: usize,
    ) -> SchedulerResult<()> {
        let (key, prefix) = layout::status_key(job_id, code);
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in layout::status_fields(&prefix, error, count, Utc::now()) {
            cmd.arg(field).arg(value);
        }
        let mut conn = self.conn.clone();
        let _: () = cmd.query_async(&mut conn).await.map_err(cache_error)?;
        Ok(())
    }

    async fn load_latest_measurements(
        &self,
        from: &HashMap<String, StringSet>,
    ) -> SchedulerResult<HashMap<GaugeId, Measurement>> {
        let mut conn = self.conn.clone();
        let mut raws: Vec<String> = Vec::new();
        for (script, codes) in from {
            let key = layout::latest_key(script);
            if codes.is_empty() {
                let all: HashMap<String, String> = redis::cmd("HGETALL")
                    .arg(&key)
                    .query_async(&mut conn)
                    .await
                    .map_err(cache_error)?;
                raws.extend(all.into_values());
            } else {
                let mut cmd = redis::cmd("HMGET");
                cmd.arg(&key);
                for code in codes.iter() {
                    cmd.arg(code);
                }
                let found: Vec<Option<String>> =
                    cmd.query_async(&mut conn).await.map_err(cache_error)?;
                raws.extend(found.into_iter().flatten());
            }
        }

        let mut result = HashMap::with_capacity(raws.len());
        for raw in raws {
            let m: Measurement = serde_json::from_str(&raw)?;
            result.insert(m.gauge_id.clone(), m);
        }
        Ok(result)
    }

    async fn save_latest_measurements(
        &self,
        ctx: CancellationToken,
        input: Stream<Measurement>,
    ) -> SchedulerResult<()> {
        let newest = layout::newest_per_gauge(&ctx, input).await?;
        if newest.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for (id, m) in &newest {
            pipe.cmd("HSET")
                .arg(layout::latest_key(&id.script))
                .arg(&id.code)
                .arg(serde_json::to_string(m)?)
                .ignore();
        }
        if ctx.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }

        debug!("Saving latest measurements of {} gauges", newest.len());
        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await.map_err(cache_error)?;
        Ok(())
    }
}
