//! COMMUNICATE 奖励：需要传达的信息必须出现在某条 assistant 文本中（忽略大小写与逗号）

use crate::model::{CommunicateCheck, Message};

fn normalize(s: &str) -> String {
    s.to_lowercase().replace(',', "")
}

pub fn evaluate_communicate(messages: &[Message], infos: &[String]) -> Vec<CommunicateCheck> {
    let said: Vec<String> = messages
        .iter()
        .filter_map(|m| match m {
            Message::Assistant(p) if p.has_text_content() => p.content.as_deref().map(normalize),
            _ => None,
        })
        .collect();
    infos
        .iter()
        .map(|info| {
            let needle = normalize(info);
            CommunicateCheck {
                info: info.clone(),
                met: said.iter().any(|text| text.contains(&needle)),
            }
        })
        .collect()
}

pub fn communicate_reward(checks: &[CommunicateCheck]) -> f64 {
    if checks.iter().all(|c| c.met) {
        1.0
    } else {
        0.0
    }
}
