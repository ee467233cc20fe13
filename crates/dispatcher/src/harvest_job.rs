use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, field, info_span, warn, Instrument, Span};

use harvester_core::channels::{deadline, filter_chain, split, Predicate, CHANNEL_CAPACITY};
use harvester_core::filters::{CodesFilter, LatestFilter};
use harvester_core::{
    CacheManager, CronJob, DatabaseManager, GaugeId, Measurement, ParsedOptions, SchedulerError,
    ScriptRegistry, StringSet,
};

/// 单次采集的运行参数
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestSettings {
    /// 单次采集的最长时间
    pub timeout: Duration,
    /// 没有缓存值时, 只接受这段时间以内的测量值
    pub horizon: chrono::Duration,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            horizon: chrono::Duration::days(30),
        }
    }
}

/// 采集任务依赖的共享组件
#[derive(Clone)]
pub struct HarvestContext {
    pub database: Arc<dyn DatabaseManager>,
    pub cache: Arc<dyn CacheManager>,
    pub registry: Arc<ScriptRegistry>,
    pub settings: HarvestSettings,
}

/// 一个定时条目对应的采集任务
///
/// 每次触发都是独立的执行, 除了缓存中的数据外不保留任何状态.
pub struct HarvestJob {
    pub job_id: String,
    /// 注册该条目时使用的CRON表达式
    pub cron: String,
    pub script: String,
    pub codes: StringSet,
    pub options: ParsedOptions,
    context: HarvestContext,
}

impl HarvestJob {
    pub fn new(
        context: HarvestContext,
        job_id: impl Into<String>,
        cron: impl Into<String>,
        script: impl Into<String>,
        codes: StringSet,
        options: ParsedOptions,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            cron: cron.into(),
            script: script.into(),
            codes,
            options,
            context,
        }
    }

    /// 只负责一个测站时返回该测站代码, 否则返回空字符串
    pub fn status_code(&self) -> &str {
        self.codes.only().unwrap_or("")
    }

    /// 单测站任务从缓存的最新时间开始请求上游, 其他情况为0
    fn since(&self, latest: &HashMap<GaugeId, Measurement>) -> i64 {
        self.codes
            .only()
            .ok()
            .and_then(|code| latest.get(&GaugeId::new(self.script.as_str(), code)))
            .map(|m| m.timestamp.timestamp())
            .unwrap_or(0)
    }

    async fn execute(&self) {
        let ctx = &self.context;
        let code = self.status_code();

        let request = HashMap::from([(self.script.clone(), self.codes.clone())]);
        let latest = match ctx.cache.load_latest_measurements(&request).await {
            Ok(latest) => latest,
            Err(e) => {
                warn!(error = %e, "加载最新测量值失败, 按无缓存继续");
                HashMap::new()
            }
        };

        let mut script = match ctx.registry.create(&self.script, &self.options) {
            Ok((script, _)) => script,
            Err(e) => {
                error!(error = %e, "创建脚本失败");
                if let Err(se) = ctx.cache.save_status(&self.job_id, code, Some(&e), 0).await {
                    error!(error = %se, "保存状态失败");
                }
                return;
            }
        };
        script.set_span(Span::current());
        let script: Arc<dyn harvester_core::Script> = Arc::from(script);

        let since = self.since(&latest);
        let run_ctx = deadline(ctx.settings.timeout);
        let _guard = run_ctx.clone().drop_guard();

        let (values_tx, values_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (errors_tx, mut errors_rx) = mpsc::channel(1);
        let mut producer = {
            let script = script.clone();
            let run_ctx = run_ctx.clone();
            let codes = self.codes.clone();
            tokio::spawn(
                async move { script.harvest(run_ctx, values_tx, errors_tx, codes, since).await }
                    .in_current_span(),
            )
        };

        let predicates: Vec<Box<dyn Predicate<Measurement>>> = vec![
            Box::new(CodesFilter::new(self.codes.clone())),
            Box::new(LatestFilter::new(latest, Utc::now() - ctx.settings.horizon)),
        ];
        let filtered = filter_chain(&run_ctx, values_rx, predicates);
        let (db_in, cache_in) = split(&run_ctx, filtered);

        let harvest_error = async {
            tokio::select! {
                biased;
                err = errors_rx.recv() => match err {
                    Some(err) => Some(err),
                    None if run_ctx.is_cancelled() => Some(SchedulerError::Timeout),
                    None => None,
                },
                _ = run_ctx.cancelled() => Some(SchedulerError::Timeout),
            }
        };
        let (harvest_err, saved, cached) = tokio::join!(
            harvest_error,
            ctx.database.save_measurements(run_ctx.clone(), db_in),
            ctx.cache.save_latest_measurements(run_ctx.clone(), cache_in),
        );
        // 生产者panic时发送端同样会关闭, 必须等它结束才能区分正常完成
        let joined = tokio::select! {
            biased;
            joined = &mut producer => Some(joined),
            _ = run_ctx.cancelled() => None,
        };
        match joined {
            Some(Err(e)) if e.is_panic() => {
                error!(panic = %panic_message(e.into_panic().as_ref()), "脚本采集时发生panic, 本次不记录状态");
                return;
            }
            Some(_) => {}
            None => producer.abort(),
        }

        let (count, db_err) = match saved {
            Ok(count) => (count, None),
            Err(e) => (0, Some(e)),
        };
        let cache_err = cached.err();

        let status_err = harvest_err.as_ref().or(db_err.as_ref()).or(cache_err.as_ref());
        if let Err(e) = ctx.cache.save_status(&self.job_id, code, status_err, count).await {
            error!(error = %e, "保存状态失败");
        }

        if let Some(e) = &harvest_err {
            error!(error = %e, "采集失败");
        }
        if let Some(e) = &db_err {
            error!(error = %e, "测量值写入数据库失败");
        }
        if let Some(e) = &cache_err {
            error!(error = %e, "测量值写入缓存失败");
        }
        if count == 0 {
            warn!("保存了0条测量值");
        } else {
            debug!(count, "保存了 {} 条测量值", count);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl CronJob for HarvestJob {
    async fn run(&self) {
        let span = info_span!(
            "harvest",
            script = %self.script,
            job_id = %self.job_id,
            code = field::Empty,
        );
        if let Ok(code) = self.codes.only() {
            span.record("code", code);
        }

        let result = AssertUnwindSafe(self.execute().instrument(span.clone()))
            .catch_unwind()
            .await;
        if let Err(panic) = result {
            span.in_scope(|| {
                error!(panic = %panic_message(panic.as_ref()), "采集任务发生panic");
            });
        }
    }
}
