//! Test data builders

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use harvester_core::{GaugeId, JobDescription, Measurement};

/// Builder for creating test JobDescription values
pub struct JobBuilder {
    job: JobDescription,
}

impl JobBuilder {
    pub fn new() -> Self {
        Self {
            job: JobDescription {
                id: "3e7a0f1c-5b8e-4d2a-9c4f-2b1d6e8a7c90".to_string(),
                script: "mock".to_string(),
                gauges: BTreeMap::new(),
                cron: "*/15 * * * *".to_string(),
                options: Value::Null,
                status: None,
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.job.id = id.to_string();
        self
    }

    pub fn with_script(mut self, script: &str) -> Self {
        self.job.script = script.to_string();
        self
    }

    pub fn with_cron(mut self, cron: &str) -> Self {
        self.job.cron = cron.to_string();
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.job.options = options;
        self
    }

    pub fn with_gauge(mut self, code: &str, options: Value) -> Self {
        self.job.gauges.insert(code.to_string(), options);
        self
    }

    /// Adds `g001` ... `gNNN` without per-gauge options
    pub fn with_gauges(mut self, n: usize) -> Self {
        for i in 1..=n {
            self.job.gauges.insert(format!("g{i:03}"), Value::Null);
        }
        self
    }

    pub fn build(self) -> JobDescription {
        self.job
    }
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Measurement with a level value at `timestamp`
pub fn measurement_at(script: &str, code: &str, timestamp: DateTime<Utc>) -> Measurement {
    Measurement::new(GaugeId::new(script, code), timestamp, Some(1.5), None)
}

/// Measurement with a level value, `minutes_ago` before now
pub fn recent_measurement(script: &str, code: &str, minutes_ago: i64) -> Measurement {
    measurement_at(script, code, Utc::now() - Duration::minutes(minutes_ago))
}
