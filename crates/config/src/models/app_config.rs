use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{CacheConfig, DatabaseConfig, HttpConfig, LogConfig, SchedulerConfig};
use crate::validation::ConfigValidator;
use crate::{ConfigError, ConfigResult};

/// 环境变量前缀, 例如 `HARVESTER_CACHE__KIND=redis`
pub const ENV_PREFIX: &str = "HARVESTER";

const DEFAULT_PATHS: [&str; 3] = [
    "config/harvester.toml",
    "harvester.toml",
    "/etc/harvester/config.toml",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogConfig,
    pub cache: CacheConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub http: HttpConfig,
}

impl AppConfig {
    /// 按 TOML 文件 -> 默认值 -> 环境变量的顺序加载配置
    ///
    /// 未指定路径时依次尝试默认位置, 都不存在则只使用默认值和环境变量.
    pub fn load(config_path: Option<&str>) -> ConfigResult<Self> {
        Self::load_with_env(config_path, Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn load_with_env(config_path: Option<&str>, env: Environment) -> ConfigResult<Self> {
        let mut builder = ConfigBuilder::builder();

        match config_path {
            Some(path) if Path::new(path).exists() => {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
            Some(path) => {
                return Err(ConfigError::File(format!("配置文件不存在: {path}")));
            }
            None => {
                if let Some(path) = DEFAULT_PATHS.iter().find(|p| Path::new(p).exists()) {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                }
            }
        }

        let config: AppConfig = builder
            .add_source(env)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> ConfigResult<Self> {
        let config: AppConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.log.validate()?;
        self.cache.validate()?;
        self.database.validate()?;
        self.scheduler.validate()?;
        self.http.validate()?;
        Ok(())
    }
}
