use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::validation::ConfigValidator;
use crate::{ConfigError, ConfigResult};

/// 缓存后端
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// 进程内缓存, 重启后丢失
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub kind: CacheKind,
    pub redis_url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: CacheKind::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl ConfigValidator for CacheConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.kind == CacheKind::Redis && self.redis_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "使用Redis缓存时必须配置cache.redis_url".to_string(),
            ));
        }
        Ok(())
    }
}

/// 数据库后端
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[default]
    Memory,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub kind: DatabaseKind,
    /// 启动时导入的任务定义文件 (JSON 数组)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs_file: Option<PathBuf>,
}

impl ConfigValidator for DatabaseConfig {
    fn validate(&self) -> ConfigResult<()> {
        Ok(())
    }
}
