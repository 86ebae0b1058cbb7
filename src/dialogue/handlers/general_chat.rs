//! 闲聊：问候、致谢、能力介绍，或把跑题的对话引回订票服务

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::HandlerError;
use crate::dialogue::intent::IntentLabel;
use crate::llm::{CompletionOptions, LlmClient, Message};

use super::{HandlerContext, HandlerReply, IntentHandler};

const SYSTEM_PROMPT: &str = "You are a friendly bus ticket booking assistant.
Respond naturally and warmly. If the user:
- greets you: greet back and briefly mention you can help with bus bookings
- thanks you: acknowledge politely
- asks what you do: explain you help with bus ticket booking, viewing, and cancellation
- goes off-topic: politely redirect to bus booking services
Keep it brief and friendly.";

pub struct GeneralChatHandler {
    llm: Arc<dyn LlmClient>,
}

impl GeneralChatHandler {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl IntentHandler for GeneralChatHandler {
    fn label(&self) -> IntentLabel {
        IntentLabel::GeneralChat
    }

    async fn handle(&self, ctx: &HandlerContext) -> Result<HandlerReply, HandlerError> {
        let messages = [
            Message::system(SYSTEM_PROMPT),
            Message::user(format!("User said: {}", ctx.message)),
        ];
        let reply = self
            .llm
            .complete(&messages, &CompletionOptions::free_text())
            .await?;
        Ok(HandlerReply::new(reply.trim()))
    }
}
