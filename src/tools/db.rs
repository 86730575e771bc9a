//! 命名空间状态的合并与哈希
//!
//! update_db 把 JSON 补丁深度合并进类型化状态（object 递归合并，其余直接替换），
//! 合并结果必须还能反序列化回 S；哈希取规范 JSON（键有序）的 blake3。

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::tools::ToolError;

/// 原地深度合并
pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                match dst.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        dst.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (dst, src) => *dst = src.clone(),
    }
}

/// 合并补丁并重新构造状态
pub fn merge_state<S>(state: &S, patch: &Value) -> Result<S, ToolError>
where
    S: Serialize + DeserializeOwned,
{
    if !patch.is_object() {
        return Err(ToolError::State(format!(
            "update data must be an object, got {patch}"
        )));
    }
    let mut value = serde_json::to_value(state).map_err(|e| ToolError::State(e.to_string()))?;
    deep_merge(&mut value, patch);
    serde_json::from_value(value).map_err(|e| ToolError::State(e.to_string()))
}

/// 状态内容哈希（hex）
pub fn state_hash<S: Serialize>(state: &S) -> Result<String, ToolError> {
    // 先转成 Value：Map 按键排序，HashMap 的迭代顺序不影响结果
    let value = serde_json::to_value(state).map_err(|e| ToolError::State(e.to_string()))?;
    let canonical = serde_json::to_vec(&value).map_err(|e| ToolError::State(e.to_string()))?;
    Ok(blake3::hash(&canonical).to_hex().to_string())
}
