//! 内置领域
//!
//! 领域提供两侧工具注册表、策略文本、同步钩子与任务集；目前只有 mock。

pub mod mock;

use crate::core::{Result, SimError};
use crate::environment::Environment;

/// 按名构造领域环境
pub fn get_environment(domain: &str, solo_mode: bool) -> Result<Environment> {
    match domain {
        mock::DOMAIN_NAME => mock::get_environment(solo_mode),
        other => Err(SimError::InvalidConfig(format!("unknown domain: {other}"))),
    }
}
