//! 工具参数 JSON Schema 生成（schemars）与参数解析
//!
//! 每个工具用一个 `#[derive(Deserialize, JsonSchema)]` 参数结构体描述入参：
//! `args_schema::<T>()` 生成绑定给 LLM 的 schema，`parse_args::<T>()` 把 tool call 的参数解析回结构体。

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// 生成参数 schema：子结构内联，去掉 `$schema` / `title` 等对 function calling 无用的字段
pub fn args_schema<T: JsonSchema>() -> Value {
    let generator = SchemaSettings::draft07()
        .with(|s| {
            s.inline_subschemas = true;
            s.option_add_null_type = false;
        })
        .into_generator();
    let root = generator.into_root_schema_for::<T>();
    let mut value = serde_json::to_value(root).unwrap_or_else(|_| Value::Object(Default::default()));
    if let Value::Object(map) = &mut value {
        map.remove("$schema");
        map.remove("title");
        map.remove("definitions");
        map.entry("properties")
            .or_insert_with(|| Value::Object(Default::default()));
    }
    value
}

/// 把 tool call 参数解析为参数结构体；失败信息可直接作为工具错误返回
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("invalid arguments: {}", e))
}
