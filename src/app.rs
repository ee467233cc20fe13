use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use harvester_config::{AppConfig, CacheKind, DatabaseKind};
use harvester_core::{
    CacheManager, CronDriver, DatabaseManager, HttpClientOptions, ScriptContext, ScriptRegistry,
};
use harvester_dispatcher::{
    HarvestContext, HarvestJob, HarvestScheduler, HarvestSettings, ImmediateCron, JobService,
    TokioCron,
};
use harvester_infrastructure::{MemoryCacheManager, MemoryDatabaseManager, RedisCacheManager};

/// 按配置创建脚本注册表
pub fn build_registry(config: &AppConfig) -> Result<ScriptRegistry> {
    let context = ScriptContext {
        http: HttpClientOptions {
            user_agent: config.http.user_agent.clone(),
            timeout_seconds: config.http.timeout_seconds,
        },
    };
    harvester_scripts::default_registry(context).context("注册内置脚本失败")
}

pub fn harvest_settings(config: &AppConfig) -> HarvestSettings {
    HarvestSettings {
        timeout: config.scheduler.harvest_timeout(),
        horizon: chrono::Duration::hours(config.scheduler.latest_horizon_hours as i64),
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    database: Arc<MemoryDatabaseManager>,
    scheduler: Arc<HarvestScheduler>,
    service: JobService,
}

impl Application {
    /// 创建新的应用实例, 此时还没有任何任务被调度
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序");

        let registry = Arc::new(build_registry(&config)?);

        let database = match config.database.kind {
            DatabaseKind::Memory => Arc::new(MemoryDatabaseManager::new()),
        };
        let cache: Arc<dyn CacheManager> = match config.cache.kind {
            CacheKind::Memory => Arc::new(MemoryCacheManager::new()),
            CacheKind::Redis => Arc::new(
                RedisCacheManager::new(&config.cache.redis_url)
                    .await
                    .context("连接Redis失败")?,
            ),
        };

        let cron: Arc<dyn CronDriver<HarvestJob>> = if config.scheduler.immediate {
            info!("使用立即执行模式, 任务添加后只运行一次");
            Arc::new(ImmediateCron::new())
        } else {
            Arc::new(TokioCron::<HarvestJob>::new())
        };

        let context = HarvestContext {
            database: database.clone() as Arc<dyn DatabaseManager>,
            cache: cache.clone(),
            registry,
            settings: harvest_settings(&config),
        };
        let scheduler = Arc::new(HarvestScheduler::new(cron, context));
        let service = JobService::new(
            scheduler.clone(),
            database.clone() as Arc<dyn DatabaseManager>,
            cache,
        );

        Ok(Self {
            config,
            database,
            scheduler,
            service,
        })
    }

    pub fn service(&self) -> &JobService {
        &self.service
    }

    /// 导入任务文件, 调度所有已保存的任务并启动定时器
    pub async fn start(&self) -> Result<usize> {
        if let Some(path) = &self.config.database.jobs_file {
            self.database
                .load_jobs_file(path)
                .await
                .with_context(|| format!("导入任务文件失败: {}", path.display()))?;
        }

        let count = self.service.bootstrap().await.context("调度已保存的任务失败")?;
        self.scheduler.start();
        info!("应用程序已启动, 共调度 {} 个任务", count);
        Ok(count)
    }

    /// 停止调度并等待正在执行的采集结束
    pub async fn shutdown(&self) {
        info!("停止调度器");
        self.scheduler.stop().await;
        info!("调度器已停止");
    }
}
