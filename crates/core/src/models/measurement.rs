use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::GaugeId;

/// 测站在某一时刻的水位和/或流量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(flatten)]
    pub gauge_id: GaugeId,
    pub timestamp: DateTime<Utc>,
    /// 测站不提供或暂时故障时为空
    pub level: Option<f64>,
    /// 测站不提供或暂时故障时为空
    pub flow: Option<f64>,
}

impl Measurement {
    pub fn new(
        gauge_id: GaugeId,
        timestamp: DateTime<Utc>,
        level: Option<f64>,
        flow: Option<f64>,
    ) -> Self {
        Self {
            gauge_id,
            timestamp,
            level,
            flow,
        }
    }

    pub fn code(&self) -> &str {
        &self.gauge_id.code
    }

    /// 水位和流量均为空的测量值不会被持久化
    pub fn has_value(&self) -> bool {
        self.level.is_some() || self.flow.is_some()
    }

    /// 测站升序, 同一测站内时间降序
    pub fn display_order(a: &Measurement, b: &Measurement) -> Ordering {
        a.gauge_id
            .cmp(&b.gauge_id)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
    }
}
