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

pub const NAME: &str = "one_by_one";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct OneByOneOptions {
    pub gauges: usize,
    pub value: Option<f64>,
    pub min: f64,
    pub max: f64,
}

impl Default for OneByOneOptions {
    fn default() -> Self {
        Self {
            gauges: 10,
            value: None,
            min: 10.0,
            max: 20.0,
        }
    }
}

impl ScriptOptions for OneByOneOptions {}

struct OneByOneScript {
    name: String,
    options: OneByOneOptions,
    logger: ScriptLogger,
}

#[async_trait]
impl Script for OneByOneScript {
    async fn list_gauges(&self) -> SchedulerResult<Vec<Gauge>> {
        Ok((0..self.options.gauges)
            .map(|i| random_gauge(&self.name, i))
            .collect())
    }

    async fn harvest(
        &self,
        ctx: CancellationToken,
        values: mpsc::Sender<Measurement>,
        errors: mpsc::Sender<SchedulerError>,
        codes: StringSet,
        _since: i64,
    ) {
        let code = match codes.only() {
            Ok(code) => code,
            Err(e) => {
                tokio::select! {
                    _ = ctx.cancelled() => {}
                    _ = errors.send(e) => {}
                }
                return;
            }
        };
        let o = &self.options;
        let m = random_measurement(&self.name, code, o.value, o.min, o.max);
        send_all(&ctx, &values, vec![m]).await;
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
        "Test script for one by one harvesting mode",
        HarvestMode::OneByOne,
        |_ctx: &ScriptContext, name: &str, options: &OneByOneOptions| {
            Ok(Box::new(OneByOneScript {
                name: name.to_string(),
                options: options.clone(),
                logger: ScriptLogger::default(),
            }) as Box<dyn Script>)
        },
    )
}
