//! 工具返回值的规范字符串形式
//!
//! 字符串原样输出；其余值输出紧凑 JSON。serde_json 的 Map 按键排序，
//! 时间类型在进入 Value 之前已由 chrono 序列化为 RFC 3339，因此同一返回值总得到同一字符串。

use serde::Serialize;
use serde_json::Value;

pub fn to_json_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 任意可序列化值的规范形式
pub fn serialize_result<T: Serialize>(value: &T) -> serde_json::Result<String> {
    Ok(to_json_str(&serde_json::to_value(value)?))
}
