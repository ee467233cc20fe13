use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Span};

use harvester_core::{
    Gauge, HarvestMode, Measurement, SchedulerError, SchedulerResult, Script, ScriptContext,
    ScriptDescriptor, ScriptLogger, ScriptOptions, StringSet,
};

use crate::generator::{gauge_code, random_gauge, random_measurement, send_all};

pub const NAME: &str = "all_at_once";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AllAtOnceOptions {
    /// 测站数量
    pub gauges: usize,
    /// 固定返回的值, 优先于 min/max
    pub value: Option<f64>,
    pub min: f64,
    pub max: f64,
    /// 生成没有坐标的测站
    pub no_location: bool,
    /// 生成海拔为0的测站
    pub no_altitude: bool,
}

impl Default for AllAtOnceOptions {
    fn default() -> Self {
        Self {
            gauges: 10,
            value: None,
            min: 10.0,
            max: 20.0,
            no_location: false,
            no_altitude: false,
        }
    }
}

impl ScriptOptions for AllAtOnceOptions {}

struct AllAtOnceScript {
    name: String,
    options: AllAtOnceOptions,
    logger: ScriptLogger,
}

#[async_trait]
impl Script for AllAtOnceScript {
    async fn list_gauges(&self) -> SchedulerResult<Vec<Gauge>> {
        let gauges = (0..self.options.gauges)
            .map(|i| {
                let mut gauge = random_gauge(&self.name, i);
                if self.options.no_location {
                    gauge.location = None;
                } else if self.options.no_altitude {
                    if let Some(location) = gauge.location.as_mut() {
                        location.altitude = 0.0;
                    }
                }
                gauge
            })
            .collect();
        Ok(gauges)
    }

    async fn harvest(
        &self,
        ctx: CancellationToken,
        values: mpsc::Sender<Measurement>,
        _errors: mpsc::Sender<SchedulerError>,
        _codes: StringSet,
        _since: i64,
    ) {
        let o = &self.options;
        let items: Vec<Measurement> = (0..o.gauges)
            .map(|i| random_measurement(&self.name, &gauge_code(i), o.value, o.min, o.max))
            .collect();
        self.span()
            .in_scope(|| debug!(count = items.len(), "generated measurements"));
        send_all(&ctx, &values, items).await;
    }

    fn set_span(&mut self, span: Span) {
        self.logger.set(span);
    }

    fn span(&self) -> Span {
        self.logger.get()
    }
}

pub fn descriptor() -> SchedulerResult<ScriptDescriptor> {
    ScriptDescriptor::new(
        NAME,
        "Test script for all at once harvesting mode",
        HarvestMode::AllAtOnce,
        |_ctx: &ScriptContext, name: &str, options: &AllAtOnceOptions| {
            Ok(Box::new(AllAtOnceScript {
                name: name.to_string(),
                options: options.clone(),
                logger: ScriptLogger::default(),
            }) as Box<dyn Script>)
        },
    )
}
