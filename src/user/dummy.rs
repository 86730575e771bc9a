//! solo 模式的占位用户：任何调用都是编排错误

use async_trait::async_trait;

use crate::agent::ActorState;
use crate::core::{Result, SimError};
use crate::model::{Message, ParticipantMessage};
use crate::user::UserSimulator;

#[derive(Debug, Default, Clone, Copy)]
pub struct DummyUser;

#[async_trait]
impl UserSimulator for DummyUser {
    fn name(&self) -> &str {
        "dummy_user"
    }

    async fn generate_next_message(
        &self,
        _incoming: &[Message],
        _state: &mut ActorState,
    ) -> Result<ParticipantMessage> {
        Err(SimError::Actor(
            "dummy user cannot generate messages".to_string(),
        ))
    }

    fn is_dummy(&self) -> bool {
        true
    }
}
