use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StringSet;
use crate::{SchedulerError, SchedulerResult};

/// 脚本的采集模式, 决定任务如何展开为定时条目
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HarvestMode {
    /// 一次请求返回全部测站, 按任务自身的 cron 运行
    AllAtOnce,
    /// 每次只采集一个测站, 所有测站在一小时内均匀分布
    OneByOne,
    /// 每次采集固定数量的一批测站, 批次在一小时内均匀分布
    Batched,
}

impl std::fmt::Display for HarvestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HarvestMode::AllAtOnce => write!(f, "allAtOnce"),
            HarvestMode::OneByOne => write!(f, "oneByOne"),
            HarvestMode::Batched => write!(f, "batched"),
        }
    }
}

/// 任务最近一次执行的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub success: bool,
    /// 最近一次执行时间 (与测量值时间无关)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 最近一次保存的测量值数量
    pub count: usize,
    /// 最近一次成功采集到数据的时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
}

impl Status {
    pub fn pending(next_run: DateTime<Utc>) -> Self {
        Self {
            next_run: Some(next_run),
            ..Default::default()
        }
    }
}

/// 用户配置的周期性采集任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    /// UUID, 由客户端生成
    pub id: String,
    /// 脚本注册表中的脚本名
    pub script: String,
    /// 测站代码 -> 该测站的采集参数 (JSON 片段, 可为 null)
    #[serde(default)]
    pub gauges: BTreeMap<String, Value>,
    /// cron 表达式, 仅 AllAtOnce 脚本使用
    #[serde(default)]
    pub cron: String,
    /// 整个任务的采集参数, 如上游凭据
    #[serde(default)]
    pub options: Value,
    /// 作为输入时必须为空
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

impl JobDescription {
    pub fn gauge_codes(&self) -> StringSet {
        self.gauges.keys().cloned().collect()
    }

    pub fn validate_id(&self) -> SchedulerResult<()> {
        uuid::Uuid::parse_str(&self.id).map_err(|_| SchedulerError::InvalidJobId {
            id: self.id.clone(),
        })?;
        Ok(())
    }
}
