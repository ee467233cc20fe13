use thiserror::Error;

/// 采集调度错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("脚本未找到: {name}")]
    ScriptNotFound { name: String },

    #[error("任务 {job_id} 必须指定测站代码")]
    EmptyGauges { job_id: String },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("脚本 {script} 的参数无效: {message}")]
    InvalidOptions { script: String, message: String },

    #[error("创建脚本 {script} 实例失败: {message}")]
    ScriptCreation { script: String, message: String },

    #[error("注册定时任务失败: {0}")]
    Schedule(String),

    #[error("任务未被调度: {job_id}")]
    JobNotScheduled { job_id: String },

    #[error("任务未找到: {id}")]
    JobNotFound { id: String },

    #[error("任务已存在: {id}")]
    JobExists { id: String },

    #[error("无效的任务ID: {id}")]
    InvalidJobId { id: String },

    #[error("采集错误: {0}")]
    Harvest(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("缓存错误: {0}")]
    Cache(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("采集超时")]
    Timeout,

    #[error("操作已取消")]
    Cancelled,

    #[error("集合必须恰好包含一个元素, 实际为 '{items}'")]
    NotSingleton { items: String },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn harvest(message: impl Into<String>) -> Self {
        Self::Harvest(message.into())
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }

    /// 配置类错误在 AddJob 阶段同步返回, 不会写入状态
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ScriptNotFound { .. }
                | Self::EmptyGauges { .. }
                | Self::InvalidCron { .. }
                | Self::InvalidOptions { .. }
                | Self::Schedule(_)
        )
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
