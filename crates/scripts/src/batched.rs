use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use harvester_core::{
    Gauge, HarvestMode, Measurement, SchedulerError, SchedulerResult, Script, ScriptContext,
    ScriptDescriptor, ScriptLogger, ScriptOptions, StringSet,
};

use crate::generator::{random_gauge, random_measurement, send_all};

pub const NAME: &str = "batched";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BatchedOptions {
    pub gauges: usize,
    pub value: Option<f64>,
    pub min: f64,
    pub max: f64,
    /// 每批的测站数量
    pub batch_size: usize,
}

impl Default for BatchedOptions {
    fn default() -> Self {
        Self {
            gauges: 10,
            value: None,
            min: 10.0,
            max: 20.0,
            batch_size: 3,
        }
    }
}

impl ScriptOptions for BatchedOptions {
    fn batch_size(&self) -> Option<usize> {
        Some(self.batch_size)
    }
}

struct BatchedScript {
    name: String,
    options: BatchedOptions,
    logger: ScriptLogger,
}

#[async_trait]
impl Script for BatchedScript {
    async fn list_gauges(&self) -> SchedulerResult<Vec<Gauge>> {
        Ok((0..self.options.gauges)
            .map(|i| random_gauge(&self.name, i))
            .collect())
    }

    async fn harvest(
        &self,
        ctx: CancellationToken,
        values: mpsc::Sender<Measurement>,
        _errors: mpsc::Sender<SchedulerError>,
        codes: StringSet,
        _since: i64,
    ) {
        let o = &self.options;
        let items = codes
            .iter()
            .map(|code| random_measurement(&self.name, code, o.value, o.min, o.max))
            .collect();
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
        "Test script for batched harvesting mode",
        HarvestMode::Batched,
        |_ctx: &ScriptContext, name: &str, options: &BatchedOptions| {
            Ok(Box::new(BatchedScript {
                name: name.to_string(),
                options: options.clone(),
                logger: ScriptLogger::default(),
            }) as Box<dyn Script>)
        },
    )
}
