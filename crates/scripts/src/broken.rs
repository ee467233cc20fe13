use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use harvester_core::{
    Gauge, HarvestMode, Measurement, SchedulerError, SchedulerResult, Script, ScriptContext,
    ScriptDescriptor, ScriptLogger, ScriptOptions, StringSet,
};

pub const NAME: &str = "broken";

const BROKEN: &str = "this script is always broken";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokenOptions {}

impl ScriptOptions for BrokenOptions {}

#[derive(Default)]
struct BrokenScript {
    logger: ScriptLogger,
}

#[async_trait]
impl Script for BrokenScript {
    async fn list_gauges(&self) -> SchedulerResult<Vec<Gauge>> {
        Err(SchedulerError::harvest(BROKEN))
    }

    async fn harvest(
        &self,
        ctx: CancellationToken,
        _values: mpsc::Sender<Measurement>,
        errors: mpsc::Sender<SchedulerError>,
        _codes: StringSet,
        _since: i64,
    ) {
        tokio::select! {
            _ = ctx.cancelled() => {}
            _ = errors.send(SchedulerError::harvest(BROKEN)) => {}
        }
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
        "Test script that always fails",
        HarvestMode::AllAtOnce,
        |_ctx: &ScriptContext, _name: &str, _options: &BrokenOptions| {
            Ok(Box::new(BrokenScript::default()) as Box<dyn Script>)
        },
    )
}
