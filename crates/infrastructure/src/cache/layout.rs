//! 缓存键布局
//!
//! 内存缓存和 Redis 缓存共用同一套哈希结构:
//!
//! ```text
//! key              field               value
//! status:jobs      <jobId>:time        最近一次执行时间 (RFC3339)
//!                  <jobId>:success     最近一次采集到数据的时间
//!                  <jobId>:count       最近一次保存的测量值数量
//!                  <jobId>:error       最近一次的错误, 成功时为空字符串
//! status:<jobId>   <code>:...          同上, 单个测站的状态
//! latest:<script>  <code>              最新测量值的 JSON
//! ```

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio_util::sync::CancellationToken;

use harvester_core::channels::Stream;
use harvester_core::{GaugeId, Measurement, SchedulerError, SchedulerResult, Status};

pub const NS_STATUS: &str = "status";
pub const NS_LATEST: &str = "latest";

const JOBS: &str = "jobs";

/// 返回状态哈希的键以及字段前缀
pub fn status_key(job_id: &str, code: &str) -> (String, String) {
    if code.is_empty() {
        (format!("{NS_STATUS}:{JOBS}"), job_id.to_string())
    } else {
        (format!("{NS_STATUS}:{job_id}"), code.to_string())
    }
}

/// `job_id` 为空时返回任务级状态的键
pub fn statuses_key(job_id: &str) -> String {
    if job_id.is_empty() {
        format!("{NS_STATUS}:{JOBS}")
    } else {
        format!("{NS_STATUS}:{job_id}")
    }
}

pub fn latest_key(script: &str) -> String {
    format!("{NS_LATEST}:{script}")
}

/// 一次状态写入涉及的字段
///
/// `success` 只在保存了测量值时更新, 失败的执行不会覆盖上一次成功的时间.
pub fn status_fields(
    prefix: &str,
    error: Option<&SchedulerError>,
    count: usize,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let time = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut fields = vec![
        (format!("{prefix}:time"), time.clone()),
        (format!("{prefix}:count"), count.to_string()),
        (
            format!("{prefix}:error"),
            error.map(ToString::to_string).unwrap_or_default(),
        ),
    ];
    if count > 0 {
        fields.push((format!("{prefix}:success"), time));
    }
    fields
}

/// 把状态哈希的字段还原为以ID为键的状态表
pub fn parse_statuses(raw: &HashMap<String, String>) -> SchedulerResult<HashMap<String, Status>> {
    let mut result: HashMap<String, Status> = HashMap::new();
    for (field, value) in raw {
        let Some((id, prop)) = field.rsplit_once(':') else {
            return Err(SchedulerError::cache(format!("无法识别的状态字段: {field}")));
        };
        let status = result.entry(id.to_string()).or_default();
        match prop {
            "time" => status.timestamp = Some(parse_time(value)?),
            "success" => status.last_success = Some(parse_time(value)?),
            "count" => {
                status.count = value
                    .parse()
                    .map_err(|_| SchedulerError::cache(format!("无法解析数量 '{value}'")))?
            }
            "error" => status.error = Some(value.clone()).filter(|e| !e.is_empty()),
            _ => {}
        }
    }
    for status in result.values_mut() {
        status.success = status.error.is_none() && status.count > 0;
    }
    Ok(result)
}

fn parse_time(value: &str) -> SchedulerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SchedulerError::cache(format!("无法解析时间 '{value}': {e}")))
}

/// 读取整个输入流, 为每个测站保留时间最新的一条
///
/// 水位和流量均为空的测量值被丢弃.
pub async fn newest_per_gauge(
    ctx: &CancellationToken,
    mut input: Stream<Measurement>,
) -> SchedulerResult<HashMap<GaugeId, Measurement>> {
    let mut newest: HashMap<GaugeId, Measurement> = HashMap::new();
    loop {
        let next = tokio::select! {
            _ = ctx.cancelled() => return Err(SchedulerError::Cancelled),
            next = input.recv() => next,
        };
        let Some(m) = next else {
            return Ok(newest);
        };
        if !m.has_value() {
            continue;
        }
        match newest.get(&m.gauge_id) {
            Some(existing) if existing.timestamp >= m.timestamp => {}
            _ => {
                newest.insert(m.gauge_id.clone(), m);
            }
        }
    }
}
