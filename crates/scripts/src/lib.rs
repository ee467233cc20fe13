//! 内置脚本
//!
//! 目前只内置了测试脚本. 它们生成随机的测站和测量值, 覆盖所有采集模式.

pub mod all_at_once;
pub mod batched;
pub mod broken;
pub mod generator;
pub mod one_by_one;

use harvester_core::{SchedulerResult, ScriptContext, ScriptRegistry};

pub use all_at_once::AllAtOnceOptions;
pub use batched::BatchedOptions;
pub use one_by_one::OneByOneOptions;

/// 注册所有内置脚本
pub fn default_registry(context: ScriptContext) -> SchedulerResult<ScriptRegistry> {
    let mut registry = ScriptRegistry::new(context);
    registry.register(all_at_once::descriptor()?);
    registry.register(one_by_one::descriptor()?);
    registry.register(batched::descriptor()?);
    registry.register(broken::descriptor()?);
    Ok(registry)
}
