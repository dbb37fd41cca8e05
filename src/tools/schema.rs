//! 工具参数 JSON Schema 生成（schemars 自动生成）
//!
//! 工具用一个参数结构体 derive JsonSchema，再由这里转为发给模型的 input_schema。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 参数结构体 -> JSON Schema（去掉 $schema / title 等与模型无关的字段）
pub fn schema_for_params<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| {
        serde_json::json!({"type": "object", "properties": {}})
    });
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct Params {
        /// glob pattern
        pattern: String,
        limit: Option<u32>,
    }

    #[test]
    fn test_schema_shape() {
        let s = schema_for_params::<Params>();
        assert_eq!(s["type"], "object");
        assert!(s["properties"]["pattern"].is_object());
        assert_eq!(s["required"], serde_json::json!(["pattern"]));
        assert!(s.get("$schema").is_none());
        assert!(s.get("title").is_none());
    }
}
