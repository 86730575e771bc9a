//! 工具参数 JSON Schema 生成
//!
//! 领域工具把参数声明为 `#[derive(JsonSchema)]` 结构体，签名里的 params 由 schemars 生成。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 返回参数类型 T 的 JSON Schema；生成失败时退回空 object schema
pub fn params_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    serde_json::to_value(&schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct Args {
        /// 用户 id
        user_id: String,
        note: Option<String>,
    }

    #[test]
    fn test_params_schema_lists_fields() {
        let schema = params_schema::<Args>();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["user_id"].is_object());
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "user_id"));
        assert!(!required.iter().any(|v| v == "note"));
    }
}
