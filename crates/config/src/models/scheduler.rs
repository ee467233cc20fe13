use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validation::ConfigValidator;
use crate::{ConfigError, ConfigResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 单次采集的超时时间
    pub harvest_timeout_seconds: u64,
    /// 早于此时间范围的测量值会被丢弃
    pub latest_horizon_hours: u64,
    /// 添加任务时立即执行一次, 不按 cron 调度
    pub immediate: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            harvest_timeout_seconds: 60,
            latest_horizon_hours: 720,
            immediate: false,
        }
    }
}

impl SchedulerConfig {
    pub fn harvest_timeout(&self) -> Duration {
        Duration::from_secs(self.harvest_timeout_seconds)
    }

    pub fn latest_horizon(&self) -> Duration {
        Duration::from_secs(self.latest_horizon_hours * 3600)
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.harvest_timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "scheduler.harvest_timeout_seconds必须大于0".to_string(),
            ));
        }
        if self.latest_horizon_hours == 0 {
            return Err(ConfigError::Validation(
                "scheduler.latest_horizon_hours必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 传递给每个脚本的HTTP客户端设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: "gauge-harvester robot".to_string(),
            timeout_seconds: 60,
        }
    }
}

impl ConfigValidator for HttpConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "http.timeout_seconds必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}
