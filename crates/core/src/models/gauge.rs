use serde::{Deserialize, Serialize};

/// 测站坐标 (EPSG:4326)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub altitude: f64,
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

/// 测站标识: 脚本名 + 上游测站代码
///
/// 排序时先按脚本, 再按代码.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GaugeId {
    pub script: String,
    pub code: String,
}

impl GaugeId {
    pub fn new(script: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            code: code.into(),
        }
    }
}

impl std::fmt::Display for GaugeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.script, self.code)
    }
}

/// 上游数据源中的测站
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gauge {
    #[serde(flatten)]
    pub id: GaugeId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}
