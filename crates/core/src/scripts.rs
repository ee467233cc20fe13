//! 采集脚本接口和脚本注册表
//!
//! 每个脚本声明自己的强类型参数. 参数以JSON片段的形式传入 (先任务级, 再测站级),
//! 依次合并到脚本默认值之上, 然后一次性反序列化成参数类型.
//! 定时任务携带的就是得到的 [`ParsedOptions`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::models::{Gauge, HarvestMode, Measurement, StringSet};
use crate::{SchedulerError, SchedulerResult};

/// 上游数据源适配器
#[async_trait]
pub trait Script: Send + Sync {
    async fn list_gauges(&self) -> SchedulerResult<Vec<Gauge>>;

    /// 采集测量值写入 `values`, 不可恢复的错误写入 `errors`.
    ///
    /// 返回时两个发送端都会被释放, 即两个通道都关闭.
    /// `codes` 和 `since` 仅用于传给上游, 脚本本身不应据此过滤.
    async fn harvest(
        &self,
        ctx: CancellationToken,
        values: mpsc::Sender<Measurement>,
        errors: mpsc::Sender<SchedulerError>,
        codes: StringSet,
        since: i64,
    );

    fn set_span(&mut self, span: Span);

    fn span(&self) -> Span;
}

/// 保存脚本写日志用的 tracing span
///
/// 脚本内嵌该结构并把 `set_span`/`span` 委托给它. 未注入 span 时日志不会输出.
#[derive(Debug, Default, Clone)]
pub struct ScriptLogger {
    span: Option<Span>,
}

impl ScriptLogger {
    pub fn set(&mut self, span: Span) {
        self.span = Some(span);
    }

    pub fn get(&self) -> Span {
        self.span.clone().unwrap_or_else(Span::none)
    }
}

/// 脚本的强类型参数
pub trait ScriptOptions: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    /// Batched 脚本每批包含的测站数量
    fn batch_size(&self) -> Option<usize> {
        None
    }
}

/// HTTP 客户端设置, 通过 [`ScriptContext`] 显式注入到脚本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpClientOptions {
    pub user_agent: String,
    pub timeout_seconds: u64,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            user_agent: "gauge-harvester robot".to_string(),
            timeout_seconds: 60,
        }
    }
}

/// 创建脚本实例时可用的共享依赖
#[derive(Debug, Clone, Default)]
pub struct ScriptContext {
    pub http: HttpClientOptions,
}

/// 由JSON片段合并并按脚本参数类型校验过的参数
#[derive(Clone)]
pub struct ParsedOptions {
    script: String,
    json: Value,
    typed: Arc<dyn Any + Send + Sync>,
    batch_size: Option<usize>,
}

impl ParsedOptions {
    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn json(&self) -> &Value {
        &self.json
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    pub fn get<O: ScriptOptions>(&self) -> Option<&O> {
        self.typed.downcast_ref::<O>()
    }
}

impl fmt::Debug for ParsedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedOptions")
            .field("script", &self.script)
            .field("json", &self.json)
            .finish()
    }
}

impl PartialEq for ParsedOptions {
    fn eq(&self, other: &Self) -> bool {
        self.script == other.script && self.json == other.json
    }
}

type ParseFn = dyn Fn(&str, Value) -> SchedulerResult<ParsedOptions> + Send + Sync;
type CreateFn =
    dyn Fn(&ScriptContext, &str, &ParsedOptions) -> SchedulerResult<Box<dyn Script>> + Send + Sync;

/// 注册到注册表中的脚本
pub struct ScriptDescriptor {
    pub name: String,
    /// 数据源的可读名称
    pub description: String,
    pub mode: HarvestMode,
    defaults: Value,
    parse: Box<ParseFn>,
    create: Box<CreateFn>,
}

impl ScriptDescriptor {
    pub fn new<O, F>(
        name: impl Into<String>,
        description: impl Into<String>,
        mode: HarvestMode,
        factory: F,
    ) -> SchedulerResult<Self>
    where
        O: ScriptOptions,
        F: Fn(&ScriptContext, &str, &O) -> SchedulerResult<Box<dyn Script>> + Send + Sync + 'static,
    {
        let defaults = serde_json::to_value(O::default())?;
        let parse = |script: &str, json: Value| -> SchedulerResult<ParsedOptions> {
            let typed: O = serde_json::from_value(json.clone()).map_err(|e| {
                SchedulerError::InvalidOptions {
                    script: script.to_string(),
                    message: e.to_string(),
                }
            })?;
            Ok(ParsedOptions {
                script: script.to_string(),
                json,
                batch_size: typed.batch_size(),
                typed: Arc::new(typed),
            })
        };
        let create = move |ctx: &ScriptContext,
                           script: &str,
                           options: &ParsedOptions|
              -> SchedulerResult<Box<dyn Script>> {
            let typed = options
                .get::<O>()
                .ok_or_else(|| SchedulerError::ScriptCreation {
                    script: script.to_string(),
                    message: format!("options were parsed for script '{}'", options.script),
                })?;
            factory(ctx, script, typed)
        };
        Ok(Self {
            name: name.into(),
            description: description.into(),
            mode,
            defaults,
            parse: Box::new(parse),
            create: Box::new(create),
        })
    }
}

/// 注册表中脚本的公开信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptInfo {
    pub name: String,
    pub description: String,
    pub mode: HarvestMode,
}

fn merge_json(base: &mut Value, fragment: &Value) {
    match (base, fragment) {
        (Value::Object(base), Value::Object(fragment)) => {
            for (key, value) in fragment {
                match base.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value)
                    }
                    _ => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, fragment) => *base = fragment.clone(),
    }
}

/// 所有可用脚本的注册表
pub struct ScriptRegistry {
    context: ScriptContext,
    descriptors: HashMap<String, ScriptDescriptor>,
}

impl ScriptRegistry {
    pub fn new(context: ScriptContext) -> Self {
        Self {
            context,
            descriptors: HashMap::new(),
        }
    }

    pub fn register(&mut self, descriptor: ScriptDescriptor) {
        self.descriptors.insert(descriptor.name.clone(), descriptor);
    }

    fn descriptor(&self, name: &str) -> SchedulerResult<&ScriptDescriptor> {
        self.descriptors
            .get(name)
            .ok_or_else(|| SchedulerError::ScriptNotFound {
                name: name.to_string(),
            })
    }

    /// 使用已解析的参数创建脚本实例
    pub fn create(
        &self,
        name: &str,
        options: &ParsedOptions,
    ) -> SchedulerResult<(Box<dyn Script>, HarvestMode)> {
        let descriptor = self.descriptor(name)?;
        let script = (descriptor.create)(&self.context, name, options).map_err(|e| match e {
            SchedulerError::ScriptCreation { .. } => e,
            other => SchedulerError::ScriptCreation {
                script: name.to_string(),
                message: other.to_string(),
            },
        })?;
        Ok((script, descriptor.mode))
    }

    /// 从单个 JSON 参数片段创建脚本实例
    pub fn create_from_json(
        &self,
        name: &str,
        raw: &Value,
    ) -> SchedulerResult<(Box<dyn Script>, HarvestMode)> {
        let options = self.parse_json_options(name, &[raw])?;
        self.create(name, &options)
    }

    /// 按顺序合并 JSON 参数片段, 后面的片段覆盖前面的.
    ///
    /// `null` 片段被忽略, 其余片段必须是 JSON 对象.
    pub fn parse_json_options(&self, name: &str, fragments: &[&Value]) -> SchedulerResult<ParsedOptions> {
        let descriptor = self.descriptor(name)?;
        let mut merged = descriptor.defaults.clone();
        for fragment in fragments {
            match fragment {
                Value::Null => continue,
                Value::Object(map) if map.is_empty() => continue,
                Value::Object(_) => merge_json(&mut merged, fragment),
                other => {
                    return Err(SchedulerError::InvalidOptions {
                        script: name.to_string(),
                        message: format!("options must be a JSON object, got {other}"),
                    })
                }
            }
        }
        if merged.is_null() {
            merged = Value::Object(Map::new());
        }
        (descriptor.parse)(name, merged)
    }

    pub fn get_mode(&self, name: &str) -> SchedulerResult<HarvestMode> {
        Ok(self.descriptor(name)?.mode)
    }

    /// 按名称排序列出所有脚本
    pub fn list(&self) -> Vec<ScriptInfo> {
        let mut result: Vec<ScriptInfo> = self
            .descriptors
            .values()
            .map(|d| ScriptInfo {
                name: d.name.clone(),
                description: d.description.clone(),
                mode: d.mode,
            })
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }
}

impl Default for ScriptRegistry {
    fn default() -> Self {
        Self::new(ScriptContext::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields, rename_all = "camelCase")]
    struct TestOptions {
        gauges: usize,
        min: f64,
        max: f64,
        batch_size: usize,
    }

    impl Default for TestOptions {
        fn default() -> Self {
            Self {
                gauges: 10,
                min: 10.0,
                max: 20.0,
                batch_size: 3,
            }
        }
    }

    impl ScriptOptions for TestOptions {
        fn batch_size(&self) -> Option<usize> {
            Some(self.batch_size)
        }
    }

    struct NoopScript {
        logger: ScriptLogger,
        #[allow(dead_code)]
        user_agent: String,
    }

    #[async_trait]
    impl Script for NoopScript {
        async fn list_gauges(&self) -> SchedulerResult<Vec<Gauge>> {
            Ok(Vec::new())
        }

        async fn harvest(
            &self,
            _ctx: CancellationToken,
            _values: mpsc::Sender<Measurement>,
            _errors: mpsc::Sender<SchedulerError>,
            _codes: StringSet,
            _since: i64,
        ) {
        }

        fn set_span(&mut self, span: Span) {
            self.logger.set(span);
        }

        fn span(&self) -> Span {
            self.logger.get()
        }
    }

    fn registry() -> ScriptRegistry {
        let mut registry = ScriptRegistry::new(ScriptContext {
            http: HttpClientOptions {
                user_agent: "test robot".to_string(),
                timeout_seconds: 5,
            },
        });
        registry.register(
            ScriptDescriptor::new(
                "test",
                "Test script",
                HarvestMode::Batched,
                |ctx: &ScriptContext, _name: &str, options: &TestOptions| {
                    if options.gauges == 0 {
                        return Err(SchedulerError::harvest("no gauges"));
                    }
                    Ok(Box::new(NoopScript {
                        logger: ScriptLogger::default(),
                        user_agent: ctx.http.user_agent.clone(),
                    }) as Box<dyn Script>)
                },
            )
            .unwrap(),
        );
        registry
    }

    #[test]
    fn test_parse_merges_fragments_in_order() {
        let registry = registry();
        let job = json!({"min": 200.0});
        let gauge = json!({"min": 100.0, "max": 300.0});
        let options = registry.parse_json_options("test", &[&job, &gauge]).unwrap();
        let typed = options.get::<TestOptions>().unwrap();
        assert_eq!(typed.min, 100.0);
        assert_eq!(typed.max, 300.0);
        assert_eq!(typed.gauges, 10);
        assert_eq!(options.batch_size(), Some(3));

        let options = registry.parse_json_options("test", &[&job, &Value::Null]).unwrap();
        assert_eq!(options.get::<TestOptions>().unwrap().min, 200.0);
        assert_eq!(options.get::<TestOptions>().unwrap().max, 20.0);
    }

    #[test]
    fn test_parse_rejects_unknown_fields() {
        let registry = registry();
        let err = registry
            .parse_json_options("test", &[&json!({"foo": "bar"})])
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidOptions { .. }));
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        let registry = registry();
        assert!(registry.parse_json_options("test", &[&json!("nope")]).is_err());
        assert!(registry.parse_json_options("test", &[&json!([1, 2])]).is_err());
    }

    #[test]
    fn test_unknown_script() {
        let registry = registry();
        assert!(matches!(
            registry.get_mode("missing"),
            Err(SchedulerError::ScriptNotFound { .. })
        ));
        assert!(registry.parse_json_options("missing", &[]).is_err());
    }

    #[test]
    fn test_create_uses_context_and_reports_factory_errors() {
        let registry = registry();
        let (script, mode) = registry.create_from_json("test", &Value::Null).unwrap();
        assert_eq!(mode, HarvestMode::Batched);
        assert!(script.span().is_none());

        let err = match registry.create_from_json("test", &json!({"gauges": 0})) {
            Err(e) => e,
            Ok(_) => panic!("expected factory error"),
        };
        assert!(matches!(err, SchedulerError::ScriptCreation { .. }));
    }

    #[test]
    fn test_list_is_sorted() {
        let mut registry = registry();
        registry.register(
            ScriptDescriptor::new(
                "alpha",
                "",
                HarvestMode::AllAtOnce,
                |_: &ScriptContext, _: &str, _: &TestOptions| {
                    Ok(Box::new(NoopScript {
                        logger: ScriptLogger::default(),
                        user_agent: String::new(),
                    }) as Box<dyn Script>)
                },
            )
            .unwrap(),
        );
        let names: Vec<String> = registry.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "test"]);
    }
}
