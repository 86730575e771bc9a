//! ACTION 奖励：每个期望动作都要在轨迹中找到匹配的工具调用

use crate::model::{Action, ActionCheck, Message};

pub fn evaluate_actions(messages: &[Message], actions: &[Action]) -> Vec<ActionCheck> {
    let predicted: Vec<_> = messages.iter().flat_map(|m| m.tool_calls()).collect();
    actions
        .iter()
        .map(|action| {
            let action_match = predicted
                .iter()
                .any(|call| action.compare_with_tool_call(call));
            ActionCheck {
                action: action.clone(),
                action_match,
                action_reward: if action_match { 1.0 } else { 0.0 },
            }
        })
        .collect()
}

pub fn action_reward(checks: &[ActionCheck]) -> f64 {
    if checks.iter().all(|c| c.action_match) {
        1.0
    } else {
        0.0
    }
}
