//! 工具执行环境
//!
//! Environment 独占 assistant / user 两个命名空间，是唯一产生副作用的地方：
//! - 对话中的 ToolCall 经 `get_response` 路由、执行并转为 ToolMessage（执行错误可恢复，写入 error=true）
//! - 初始化 / 评估使用的 EnvFunctionCall 与 EnvAssertion（失败为致命错误）
//! - `set_state` 在全新环境上回放历史，回放结果与记录不一致即中止
//!
//! 每次工具调用后都会执行同步钩子 `ToolSync`，供领域环境对两侧镜像状态做对账。

pub mod replay;
pub mod serialize;

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{Result, SimError};
use crate::model::{
    EnvAssertion, EnvFunctionCall, EnvStep, InitializationData, Message, ToolCall, ToolMessage,
    ToolRequestor,
};
use crate::tools::{ToolError, ToolKit, ToolSignature};

pub use replay::{contents_match, extract_tool_pairs};
pub use serialize::to_json_str;

/// 工具调用后的对账钩子；默认实现为空操作
pub trait ToolSync: Send + Sync {
    fn sync(
        &self,
        tools: Option<&mut Box<dyn ToolKit>>,
        user_tools: Option<&mut Box<dyn ToolKit>>,
    );
}

/// 环境描述：领域、策略与两侧工具签名
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub domain_name: String,
    pub policy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_defs: Option<BTreeMap<String, ToolSignature>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_tool_defs: Option<BTreeMap<String, ToolSignature>>,
}

pub struct Environment {
    domain_name: String,
    policy: String,
    tools: Option<Box<dyn ToolKit>>,
    user_tools: Option<Box<dyn ToolKit>>,
    solo_mode: bool,
    sync: Option<Box<dyn ToolSync>>,
}

impl Environment {
    pub fn new(
        domain_name: impl Into<String>,
        policy: impl Into<String>,
        tools: Option<Box<dyn ToolKit>>,
        user_tools: Option<Box<dyn ToolKit>>,
    ) -> Self {
        Self {
            domain_name: domain_name.into(),
            policy: policy.into(),
            tools,
            user_tools,
            solo_mode: false,
            sync: None,
        }
    }

    /// 设置每次工具调用后运行的同步钩子
    pub fn with_sync(mut self, sync: impl ToolSync + 'static) -> Self {
        self.sync = Some(Box::new(sync));
        self
    }

    /// 领域名
    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }

    /// agent 侧策略文本
    pub fn policy(&self) -> &str {
        &self.policy
    }

    /// 是否处于 solo 模式
    pub fn solo_mode(&self) -> bool {
        self.solo_mode
    }

    /// 进入 solo 模式前检查两侧工具名不相交
    pub fn set_solo_mode(&mut self, solo_mode: bool) -> Result<()> {
        if solo_mode {
            self.validate_solo_mode()?;
        }
        self.solo_mode = solo_mode;
        Ok(())
    }

    /// solo 模式要求 user 侧工具名不与 assistant 侧冲突
    pub fn validate_solo_mode(&self) -> Result<()> {
        let (Some(tools), Some(user_tools)) = (&self.tools, &self.user_tools) else {
            return Ok(());
        };
        let overlap: Vec<String> = tools
            .tool_names()
            .into_iter()
            .filter(|name| user_tools.has_tool(name))
            .collect();
        if overlap.is_empty() {
            Ok(())
        } else {
            Err(SimError::SoloModeOverlap(overlap))
        }
    }

    /// 某侧工具集；该侧未配置时为 None
    pub fn toolkit(&self, side: ToolRequestor) -> Option<&dyn ToolKit> {
        match side {
            ToolRequestor::Assistant => self.tools.as_deref(),
            ToolRequestor::User => self.user_tools.as_deref(),
        }
    }

    /// toolkit 的可变版本，供直接修改状态
    pub fn toolkit_mut(&mut self, side: ToolRequestor) -> Option<&mut Box<dyn ToolKit>> {
        match side {
            ToolRequestor::Assistant => self.tools.as_mut(),
            ToolRequestor::User => self.user_tools.as_mut(),
        }
    }

    /// 该侧可用的工具签名（solo 模式下 assistant 侧包含 user 工具）
    pub fn get_tools(&self, side: ToolRequestor) -> Vec<ToolSignature> {
        let mut sigs = self.toolkit(side).map(|k| k.signatures()).unwrap_or_default();
        if self.solo_mode && side == ToolRequestor::Assistant {
            if let Some(user_tools) = &self.user_tools {
                sigs.extend(user_tools.signatures());
                sigs.sort_by(|a, b| a.name.cmp(&b.name));
            }
        }
        sigs
    }

    /// 带编号的工具清单，按名排序
    pub fn tools_description(&self, side: ToolRequestor) -> String {
        self.get_tools(side)
            .iter()
            .enumerate()
            .map(|(i, sig)| format!("{}. {}: {}", i + 1, sig.name, sig.doc))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 领域描述：名称、策略，可选附带两侧工具签名
    pub fn get_info(&self, include_tool_info: bool) -> EnvironmentInfo {
        let defs = |kit: &Option<Box<dyn ToolKit>>| {
            kit.as_ref().map(|k| {
                k.signatures()
                    .into_iter()
                    .map(|sig| (sig.name.clone(), sig))
                    .collect::<BTreeMap<_, _>>()
            })
        };
        EnvironmentInfo {
            domain_name: self.domain_name.clone(),
            policy: self.policy.clone(),
            tool_defs: include_tool_info.then(|| defs(&self.tools)).flatten(),
            user_tool_defs: include_tool_info.then(|| defs(&self.user_tools)).flatten(),
        }
    }

    /// 按 requestor 路由并执行一次工具调用
    pub async fn make_tool_call(
        &mut self,
        name: &str,
        requestor: ToolRequestor,
        args: Value,
    ) -> std::result::Result<Value, ToolError> {
        match requestor {
            ToolRequestor::User => {
                if self.solo_mode {
                    return Err(ToolError::UserCallInSoloMode(name.to_string()));
                }
                let kit = self
                    .user_tools
                    .as_mut()
                    .ok_or(ToolError::NamespaceUnavailable(ToolRequestor::User))?;
                kit.use_tool(name, args).await
            }
            ToolRequestor::Assistant => {
                if self.solo_mode {
                    if let Some(user_tools) = self.user_tools.as_mut() {
                        if user_tools.has_tool(name) {
                            return user_tools.use_tool(name, args).await;
                        }
                    }
                }
                let kit = self
                    .tools
                    .as_mut()
                    .ok_or(ToolError::NamespaceUnavailable(ToolRequestor::Assistant))?;
                kit.use_tool(name, args).await
            }
        }
    }

    /// 执行 ToolCall 并生成对应 ToolMessage；执行错误写入 content 并置 error=true
    pub async fn get_response(&mut self, call: &ToolCall) -> ToolMessage {
        let start = Instant::now();
        let result = self
            .make_tool_call(&call.name, call.requestor, call.arguments_value())
            .await;

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "requestor": call.requestor.to_string(),
            "ok": result.is_ok(),
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.arguments_value()),
        });
        tracing::info!(audit = %audit, "tool");

        let message = match result {
            Ok(value) => ToolMessage::new(call.id.clone(), to_json_str(&value), call.requestor),
            Err(e) => {
                tracing::debug!(tool = %call.name, error = %e, "tool call failed");
                let mut msg = ToolMessage::new(call.id.clone(), format!("Error: {e}"), call.requestor);
                msg.error = true;
                msg
            }
        };
        self.sync_tools();
        message
    }

    /// 运行同步钩子，把一侧状态投影到另一侧
    pub fn sync_tools(&mut self) {
        if let Some(sync) = &self.sync {
            sync.sync(self.tools.as_mut(), self.user_tools.as_mut());
        }
    }

    /// 执行环境函数（先查函数表，再查工具）；任何失败都是致命的
    pub async fn run_env_function_call(&mut self, call: &EnvFunctionCall) -> Result<Value> {
        let kit = self
            .toolkit_mut(call.env_type)
            .ok_or(SimError::MissingToolKit(call.env_type))?;
        if !kit.has_function(&call.func_name) && !kit.has_tool(&call.func_name) {
            return Err(SimError::UnknownFunction {
                env_type: call.env_type,
                func: call.func_name.clone(),
            });
        }
        let result = kit
            .call_function(&call.func_name, Value::Object(call.arguments.clone()))
            .await
            .map_err(|source| SimError::EnvFunction {
                func: call.func_name.clone(),
                source,
            })?;
        self.sync_tools();
        Ok(result)
    }

    /// 结果必须是 bool；raise_on_failure 时不满足即返回 AssertionFailed
    pub async fn run_env_assertion(
        &mut self,
        assertion: &EnvAssertion,
        raise_on_failure: bool,
    ) -> Result<bool> {
        let value = self.run_env_function_call(&assertion.call).await?;
        let Value::Bool(got) = value else {
            return Err(SimError::NonBooleanAssertion {
                func: assertion.call.func_name.clone(),
                got: value.to_string(),
            });
        };
        let met = got == assertion.assert_value;
        if !met && raise_on_failure {
            let message = assertion.message.clone().unwrap_or_else(|| {
                format!("{} expected {}", assertion.call, assertion.assert_value)
            });
            return Err(SimError::AssertionFailed(message));
        }
        Ok(met)
    }

    /// 顺序执行；任一断言或调用失败即返回
    pub async fn run_env_function_calls(&mut self, steps: &[EnvStep]) -> Result<()> {
        for step in steps {
            match step {
                EnvStep::Call(call) => {
                    self.run_env_function_call(call).await?;
                }
                EnvStep::Assertion(assertion) => {
                    self.run_env_assertion(assertion, true).await?;
                }
            }
        }
        Ok(())
    }

    pub fn update_db(&mut self, side: ToolRequestor, patch: &Value) -> Result<()> {
        let kit = self
            .toolkit_mut(side)
            .ok_or(SimError::MissingToolKit(side))?;
        kit.update_db(patch).map_err(|source| SimError::EnvFunction {
            func: "update_db".to_string(),
            source,
        })
    }

    /// 确定性地重建状态：合并种子数据 → 执行初始化动作 → 回放历史中的工具调用
    pub async fn set_state(
        &mut self,
        initialization_data: Option<&InitializationData>,
        initialization_actions: &[EnvFunctionCall],
        message_history: &[Message],
    ) -> Result<()> {
        if self.solo_mode && message_history.iter().any(|m| matches!(m, Message::User(_))) {
            return Err(SimError::UserMessageInSoloMode);
        }

        if let Some(data) = initialization_data {
            if let Some(agent_data) = &data.agent_data {
                self.update_db(ToolRequestor::Assistant, agent_data)?;
            }
            if let Some(user_data) = &data.user_data {
                self.update_db(ToolRequestor::User, user_data)?;
            }
        }

        for action in initialization_actions {
            self.run_env_function_call(action).await?;
        }

        let pairs = extract_tool_pairs(message_history)?;
        tracing::debug!(pairs = pairs.len(), "replaying tool calls");
        for (call, expected) in pairs {
            let response = self.get_response(&call).await;
            if !contents_match(response.content_str(), expected.content_str()) {
                return Err(SimError::ReplayMismatch {
                    call_id: call.id,
                    name: call.name,
                    returned: response.content_str().to_string(),
                    expected: expected.content_str().to_string(),
                });
            }
        }
        self.sync_tools();
        Ok(())
    }

    /// 某侧状态哈希；该侧不存在时为 None
    pub fn db_hash(&self, side: ToolRequestor) -> Result<Option<String>> {
        self.toolkit(side)
            .map(|kit| kit.db_hash())
            .transpose()
            .map_err(|source| SimError::EnvFunction {
                func: "db_hash".to_string(),
                source,
            })
    }

    /// assistant 侧状态哈希
    pub fn get_db_hash(&self) -> Result<Option<String>> {
        self.db_hash(ToolRequestor::Assistant)
    }

    /// user 侧状态哈希
    pub fn get_user_db_hash(&self) -> Result<Option<String>> {
        self.db_hash(ToolRequestor::User)
    }

    /// 两侧状态哈希都与参照环境一致
    pub fn check_db(&self, reference: &Environment) -> Result<bool> {
        Ok(self.get_db_hash()? == reference.get_db_hash()?
            && self.get_user_db_hash()? == reference.get_user_db_hash()?)
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParticipantMessage;
    use crate::tools::{json_result, FnTool, ToolRegistry};
    use serde_json::json;

    type Counter = BTreeMap<String, i64>;

    fn kit(names: &[&str]) -> Box<dyn ToolKit> {
        let mut reg = ToolRegistry::new(Counter::new());
        for name in names {
            let key = name.to_string();
            reg.register(FnTool::new(*name, "count calls", move |db: &mut Counter, _: &Value| {
                let n = db.entry(key.clone()).or_insert(0);
                *n += 1;
                json_result(*n)
            }));
        }
        reg.register(FnTool::new("fail", "always fails", |_: &mut Counter, _: &Value| {
            Err(ToolError::Execution("boom".into()))
        }));
        reg.register_function("is_positive", |db: &mut Counter, args: &Value| {
            let key = args["key"].as_str().unwrap_or_default();
            Ok(Value::Bool(db.get(key).copied().unwrap_or(0) > 0))
        });
        Box::new(reg)
    }

    fn env() -> Environment {
        Environment::new("test", "be nice", Some(kit(&["a"])), Some(kit_user()))
    }

    fn kit_user() -> Box<dyn ToolKit> {
        Box::new(ToolRegistry::new(Counter::new()).with_tool(FnTool::new(
            "u",
            "user tool",
            |db: &mut Counter, _: &Value| {
                *db.entry("u".into()).or_insert(0) += 1;
                json_result("ok")
            },
        )))
    }

    #[tokio::test]
    async fn test_get_response_success_and_error() {
        let mut env = env();
        let ok = env.get_response(&ToolCall::new("1", "a", json!({}))).await;
        assert_eq!(ok.content_str(), "1");
        assert!(!ok.error);

        let err = env.get_response(&ToolCall::new("2", "fail", json!({}))).await;
        assert!(err.error);
        assert_eq!(err.content_str(), "Error: boom");
        assert_eq!(err.id, "2");

        let missing = env.get_response(&ToolCall::new("3", "nope", json!({}))).await;
        assert!(missing.error);
        assert_eq!(missing.content_str(), "Error: Tool 'nope' not found.");
    }

    #[tokio::test]
    async fn test_routing_by_requestor() {
        let mut env = env();
        // assistant 不能直接用 user 工具（非 solo）
        assert_eq!(
            env.make_tool_call("u", ToolRequestor::Assistant, json!({})).await,
            Err(ToolError::NotFound("u".into()))
        );
        assert_eq!(
            env.make_tool_call("u", ToolRequestor::User, json!({})).await,
            Ok(json!("ok"))
        );

        env.set_solo_mode(true).unwrap();
        assert_eq!(
            env.make_tool_call("u", ToolRequestor::Assistant, json!({})).await,
            Ok(json!("ok"))
        );
        assert_eq!(
            env.make_tool_call("u", ToolRequestor::User, json!({})).await,
            Err(ToolError::UserCallInSoloMode("u".into()))
        );
    }

    #[test]
    fn test_solo_mode_overlap_rejected() {
        let mut env = Environment::new("test", "", Some(kit(&["a", "b"])), Some(kit(&["b"])));
        // "fail" 与 "b" 两侧都有
        match env.set_solo_mode(true) {
            Err(SimError::SoloModeOverlap(names)) => {
                assert_eq!(names, vec!["b".to_string(), "fail".to_string()])
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(!env.solo_mode());
    }

    #[tokio::test]
    async fn test_env_assertion_policies() {
        let mut env = env();
        let positive = EnvAssertion::new(ToolRequestor::Assistant, "is_positive", json!({"key": "a"}));
        assert!(!env.run_env_assertion(&positive, false).await.unwrap());
        assert!(matches!(
            env.run_env_assertion(&positive.clone().with_message("a must run"), true).await,
            Err(SimError::AssertionFailed(m)) if m == "a must run"
        ));

        let non_bool = EnvAssertion::new(ToolRequestor::Assistant, "a", json!({}));
        assert!(matches!(
            env.run_env_assertion(&non_bool, false).await,
            Err(SimError::NonBooleanAssertion { .. })
        ));

        let unknown = EnvFunctionCall::new(ToolRequestor::Assistant, "missing", json!({}));
        assert!(matches!(
            env.run_env_function_call(&unknown).await,
            Err(SimError::UnknownFunction { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_env_function_calls_fail_fast() {
        let mut env = env();
        let steps = vec![
            EnvStep::Call(EnvFunctionCall::new(ToolRequestor::Assistant, "a", json!({}))),
            EnvStep::Assertion(EnvAssertion::new(
                ToolRequestor::Assistant,
                "is_positive",
                json!({"key": "a"}),
            )),
            EnvStep::Call(EnvFunctionCall::new(ToolRequestor::Assistant, "fail", json!({}))),
            EnvStep::Call(EnvFunctionCall::new(ToolRequestor::Assistant, "a", json!({}))),
        ];
        let err = env.run_env_function_calls(&steps).await.unwrap_err();
        assert!(matches!(err, SimError::EnvFunction { ref func, .. } if func == "fail"));
        // 失败之后的调用没有执行
        let count = env.make_tool_call("a", ToolRequestor::Assistant, json!({})).await;
        assert_eq!(count, Ok(json!(2)));
    }

    #[tokio::test]
    async fn test_set_state_replays_and_detects_mismatch() {
        let call = |id: &str| {
            Message::Assistant(ParticipantMessage::tool_calls(vec![ToolCall::new(id, "a", json!({}))]))
        };
        let result = |id: &str, content: &str| {
            Message::Tool(ToolMessage::new(id, content, ToolRequestor::Assistant))
        };

        let history = vec![call("1"), result("1", "1"), call("2"), result("2", "2")];
        let mut fresh = env();
        fresh.set_state(None, &[], &history).await.unwrap();
        assert_eq!(
            fresh.make_tool_call("a", ToolRequestor::Assistant, json!({})).await,
            Ok(json!(3))
        );

        let tampered = vec![call("1"), result("1", "1"), call("2"), result("2", "5")];
        let mut fresh = env();
        assert!(matches!(
            fresh.set_state(None, &[], &tampered).await,
            Err(SimError::ReplayMismatch { ref call_id, .. }) if call_id == "2"
        ));
    }

    #[tokio::test]
    async fn test_set_state_merges_initialization_data() {
        let mut env = env();
        let data = InitializationData {
            agent_data: Some(json!({"a": 10})),
            user_data: None,
        };
        env.set_state(Some(&data), &[], &[]).await.unwrap();
        assert_eq!(
            env.make_tool_call("a", ToolRequestor::Assistant, json!({})).await,
            Ok(json!(11))
        );
    }

    #[tokio::test]
    async fn test_check_db_compares_both_sides() {
        let mut a = env();
        let b = env();
        assert!(a.check_db(&b).unwrap());
        a.make_tool_call("u", ToolRequestor::User, json!({})).await.unwrap();
        assert!(!a.check_db(&b).unwrap());
    }

    #[test]
    fn test_tools_description_is_numbered_and_sorted() {
        let env = env();
        assert_eq!(env.tools_description(ToolRequestor::Assistant), "1. a: count calls\n2. fail: always fails");
        let info = env.get_info(true);
        assert_eq!(info.domain_name, "test");
        assert!(info.user_tool_defs.unwrap().contains_key("u"));
        assert!(env.get_info(false).tool_defs.is_none());
    }
}
