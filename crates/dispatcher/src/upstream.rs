//! 调度之外对上游数据源的一次性访问

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info_span, Instrument, Span};

use harvester_core::channels::{deadline, drain_pair, filter_chain, Predicate, CHANNEL_CAPACITY};
use harvester_core::filters::CodesFilter;
use harvester_core::{
    Gauge, HarvestMode, Measurement, SchedulerError, SchedulerResult, Script, ScriptRegistry,
    StringSet,
};

/// 立即从上游采集一次测量值, 不写入任何存储
///
/// 逐个采集的脚本必须恰好指定一个测站. 指定了测站代码时只返回这些测站的测量值.
/// 采集出错时立即返回错误, 丢弃已收到的测量值.
pub async fn harvest_now(
    registry: &ScriptRegistry,
    script_name: &str,
    options: &Value,
    codes: StringSet,
    since: i64,
    timeout: Duration,
) -> SchedulerResult<Vec<Measurement>> {
    let span = info_span!("upstream_harvest", script = script_name);
    async move {
        let (mut script, mode) = registry.create_from_json(script_name, options)?;
        if mode == HarvestMode::OneByOne {
            codes.only()?;
        }
        script.set_span(Span::current());
        let script: Arc<dyn Script> = Arc::from(script);

        let ctx = deadline(timeout);
        let _guard = ctx.clone().drop_guard();
        let (values_tx, values_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let producer = {
            let script = script.clone();
            let ctx = ctx.clone();
            let codes = codes.clone();
            tokio::spawn(
                async move { script.harvest(ctx, values_tx, errors_tx, codes, since).await }
                    .in_current_span(),
            )
        };

        let values = if codes.is_empty() {
            values_rx
        } else {
            let predicates: Vec<Box<dyn Predicate<Measurement>>> =
                vec![Box::new(CodesFilter::new(codes))];
            filter_chain(&ctx, values_rx, predicates)
        };

        let result = tokio::select! {
            result = drain_pair(values, errors_rx) => result,
            _ = ctx.cancelled() => Err(SchedulerError::Timeout),
        };
        producer.abort();

        let mut measurements = result?;
        measurements.sort_by(Measurement::display_order);
        debug!(count = measurements.len(), "上游采集完成");
        Ok(measurements)
    }
    .instrument(span)
    .await
}

/// 列出上游的所有测站, 按测站ID排序
pub async fn list_gauges_now(
    registry: &ScriptRegistry,
    script_name: &str,
    options: &Value,
) -> SchedulerResult<Vec<Gauge>> {
    let (script, _) = registry.create_from_json(script_name, options)?;
    let mut gauges = script.list_gauges().await?;
    gauges.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(gauges)
}
