//! 工具注册表
//!
//! 每个命名空间（assistant / user）一个 ToolRegistry：持有该侧的类型化状态 S，
//! 按名注册工具（可被对话中的 ToolCall 调用）与环境函数（仅供 EnvFunctionCall 使用，如断言探针）。
//! Environment 通过对象安全的 ToolKit trait 使用它，从而不关心 S 的具体类型。

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::ToolRequestor;
use crate::tools::db;

/// 工具执行错误（可恢复通道）：由 Environment 转为 error=true 的 ToolMessage
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool '{0}' not found.")]
    NotFound(String),

    #[error("{0} tools are not available")]
    NamespaceUnavailable(ToolRequestor),

    #[error("User tool '{0}' cannot be called in solo mode")]
    UserCallInSoloMode(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Execution(String),

    /// 状态序列化 / 合并失败
    #[error("Invalid state: {0}")]
    State(String),
}

/// 工具能力类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    #[default]
    Read,
    Write,
    Think,
    Generic,
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolKind::Read => "read",
            ToolKind::Write => "write",
            ToolKind::Think => "think",
            ToolKind::Generic => "generic",
        };
        f.write_str(s)
    }
}

/// 可内省的工具签名（仅用于提示词 / 文档）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSignature {
    pub name: String,
    pub doc: String,
    pub kind: ToolKind,
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolStatistics {
    pub num_tools: usize,
    pub num_read_tools: usize,
    pub num_write_tools: usize,
    pub num_think_tools: usize,
    pub num_generic_tools: usize,
}

/// 工具：名称、描述、能力类型、参数 schema、对本侧状态的异步执行
#[async_trait]
pub trait Tool<S>: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn kind(&self) -> ToolKind {
        ToolKind::Read
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, db: &mut S, args: Value) -> Result<Value, ToolError>;
}

type SyncFn<S> = dyn Fn(&mut S, &Value) -> Result<Value, ToolError> + Send + Sync;

/// 把同步闭包包装成 Tool
pub struct FnTool<S> {
    name: String,
    description: String,
    kind: ToolKind,
    schema: Option<Value>,
    func: Box<SyncFn<S>>,
    _state: PhantomData<fn() -> S>,
}

impl<S> FnTool<S> {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut S, &Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            kind: ToolKind::Read,
            schema: None,
            func: Box::new(func),
            _state: PhantomData,
        }
    }

    pub fn kind(mut self, kind: ToolKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

#[async_trait]
impl<S: Send> Tool<S> for FnTool<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn kind(&self) -> ToolKind {
        self.kind
    }

    fn parameters_schema(&self) -> Value {
        match &self.schema {
            Some(schema) => schema.clone(),
            None => serde_json::json!({"type": "object", "properties": {}, "required": []}),
        }
    }

    async fn execute(&self, db: &mut S, args: Value) -> Result<Value, ToolError> {
        (self.func)(db, &args)
    }
}

/// 把可序列化的返回值转为 JSON
pub fn json_result<T: Serialize>(value: T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::State(e.to_string()))
}

/// 按名解析参数
pub fn parse_args<T: DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// 单侧注册表：状态 + 工具 + 环境函数
pub struct ToolRegistry<S> {
    db: S,
    tools: BTreeMap<String, Arc<dyn Tool<S>>>,
    functions: BTreeMap<String, Arc<SyncFn<S>>>,
}

impl<S> ToolRegistry<S>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(db: S) -> Self {
        Self {
            db,
            tools: BTreeMap::new(),
            functions: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool<S> + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn with_tool(mut self, tool: impl Tool<S> + 'static) -> Self {
        self.register(tool);
        self
    }

    /// 注册环境函数（不会出现在工具列表中）
    pub fn register_function<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&mut S, &Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(func));
    }

    pub fn with_function<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut S, &Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        self.register_function(name, func);
        self
    }

    pub fn db(&self) -> &S {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut S {
        &mut self.db
    }
}

/// 对象安全的命名空间接口，Environment 只依赖它
#[async_trait]
pub trait ToolKit: Send + Sync {
    fn has_tool(&self, name: &str) -> bool;

    fn has_function(&self, name: &str) -> bool;

    /// 按名排序
    fn tool_names(&self) -> Vec<String>;

    fn signatures(&self) -> Vec<ToolSignature>;

    fn tool_kind(&self, name: &str) -> Option<ToolKind>;

    fn statistics(&self) -> ToolStatistics {
        let mut stats = ToolStatistics::default();
        for name in self.tool_names() {
            stats.num_tools += 1;
            match self.tool_kind(&name) {
                Some(ToolKind::Read) => stats.num_read_tools += 1,
                Some(ToolKind::Write) => stats.num_write_tools += 1,
                Some(ToolKind::Think) => stats.num_think_tools += 1,
                Some(ToolKind::Generic) | None => stats.num_generic_tools += 1,
            }
        }
        stats
    }

    async fn use_tool(&mut self, name: &str, args: Value) -> Result<Value, ToolError>;

    /// 先查环境函数，再查工具
    async fn call_function(&mut self, name: &str, args: Value) -> Result<Value, ToolError>;

    fn update_db(&mut self, patch: &Value) -> Result<(), ToolError>;

    fn db_value(&self) -> Result<Value, ToolError>;

    fn db_hash(&self) -> Result<String, ToolError>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[async_trait]
impl<S> ToolKit for ToolRegistry<S>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    fn signatures(&self) -> Vec<ToolSignature> {
        self.tools
            .values()
            .map(|tool| ToolSignature {
                name: tool.name().to_string(),
                doc: tool.description().to_string(),
                kind: tool.kind(),
                params: tool.parameters_schema(),
                returns: None,
            })
            .collect()
    }

    fn tool_kind(&self, name: &str) -> Option<ToolKind> {
        self.tools.get(name).map(|t| t.kind())
    }

    async fn use_tool(&mut self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(&mut self.db, args).await
    }

    async fn call_function(&mut self, name: &str, args: Value) -> Result<Value, ToolError> {
        if let Some(func) = self.functions.get(name).cloned() {
            return func(&mut self.db, &args);
        }
        self.use_tool(name, args).await
    }

    fn update_db(&mut self, patch: &Value) -> Result<(), ToolError> {
        self.db = db::merge_state(&self.db, patch)?;
        Ok(())
    }

    fn db_value(&self) -> Result<Value, ToolError> {
        serde_json::to_value(&self.db).map_err(|e| ToolError::State(e.to_string()))
    }

    fn db_hash(&self) -> Result<String, ToolError> {
        db::state_hash(&self.db)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default, Serialize, Deserialize)]
    struct Counter {
        value: i64,
    }

    fn registry() -> ToolRegistry<Counter> {
        ToolRegistry::new(Counter::default())
            .with_tool(
                FnTool::new("incr", "Add one", |db: &mut Counter, _args: &Value| {
                    db.value += 1;
                    json_result(db.value)
                })
                .kind(ToolKind::Write),
            )
            .with_tool(FnTool::new("read", "Current value", |db: &mut Counter, _: &Value| {
                json_result(db.value)
            }))
            .with_function("assert_value", |db: &mut Counter, args: &Value| {
                Ok(Value::Bool(args["expected"].as_i64() == Some(db.value)))
            })
    }

    #[tokio::test]
    async fn test_use_tool_mutates_state() {
        let mut reg = registry();
        assert_eq!(reg.use_tool("incr", json!({})).await.unwrap(), json!(1));
        assert_eq!(reg.use_tool("read", json!({})).await.unwrap(), json!(1));
        assert_eq!(reg.db().value, 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let mut reg = registry();
        let err = reg.use_tool("missing", json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::NotFound("missing".into()));
        assert_eq!(err.to_string(), "Tool 'missing' not found.");
    }

    #[tokio::test]
    async fn test_functions_are_not_tools() {
        let mut reg = registry();
        assert!(!reg.has_tool("assert_value"));
        assert!(reg.use_tool("assert_value", json!({})).await.is_err());
        let ok = reg
            .call_function("assert_value", json!({"expected": 0}))
            .await
            .unwrap();
        assert_eq!(ok, json!(true));
        // 工具也能通过 call_function 调用
        assert_eq!(reg.call_function("incr", json!({})).await.unwrap(), json!(1));
    }

    #[test]
    fn test_statistics_and_sorted_names() {
        let reg = registry();
        assert_eq!(reg.tool_names(), vec!["incr".to_string(), "read".to_string()]);
        let stats = reg.statistics();
        assert_eq!(stats.num_tools, 2);
        assert_eq!(stats.num_write_tools, 1);
        assert_eq!(stats.num_read_tools, 1);
    }

    #[test]
    fn test_update_db_and_hash() {
        let mut reg = registry();
        let before = reg.db_hash().unwrap();
        reg.update_db(&json!({"value": 7})).unwrap();
        assert_eq!(reg.db().value, 7);
        assert_ne!(before, reg.db_hash().unwrap());
    }
}
