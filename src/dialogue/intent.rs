//! 意图识别：一次补全调用，返回六个意图标签之一
//!
//! 标签之外的输出不做任何兜底，交由 Orchestrator 作为路由错误返回。

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::BotError;
use crate::llm::{CompletionOptions, LlmClient, Message};
use crate::store::Turn;

use super::state::format_history;

/// 封闭的意图集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    GeneralChat,
    AskForInfo,
    ProviderInfo,
    BookTicket,
    ViewTicket,
    CancelTicket,
}

impl IntentLabel {
    pub const ALL: [IntentLabel; 6] = [
        IntentLabel::GeneralChat,
        IntentLabel::AskForInfo,
        IntentLabel::ProviderInfo,
        IntentLabel::BookTicket,
        IntentLabel::ViewTicket,
        IntentLabel::CancelTicket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentLabel::GeneralChat => "general_chat",
            IntentLabel::AskForInfo => "ask_for_info",
            IntentLabel::ProviderInfo => "provider_info",
            IntentLabel::BookTicket => "book_ticket",
            IntentLabel::ViewTicket => "view_ticket",
            IntentLabel::CancelTicket => "cancel_ticket",
        }
    }

    /// 解析模型输出：忽略首尾空白、引号/反引号和结尾句号，不区分大小写
    pub fn parse(raw: &str) -> Option<Self> {
        let token = raw
            .trim()
            .trim_matches(|c| c == '"' || c == '\'' || c == '`')
            .trim_end_matches('.')
            .trim()
            .to_ascii_lowercase();
        Self::ALL.into_iter().find(|l| l.as_str() == token)
    }
}

impl fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    history_limit: usize,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, history_limit: usize) -> Self {
        Self { llm, history_limit }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// 识别当前消息的意图；recent_turns 超出窗口的部分被忽略
    pub async fn classify(&self, message: &str, recent_turns: &[Turn]) -> Result<IntentLabel, BotError> {
        let start = recent_turns.len().saturating_sub(self.history_limit);
        let prompt = build_prompt(message, &recent_turns[start..], self.history_limit);

        let raw = self
            .llm
            .complete(&[Message::user(prompt)], &CompletionOptions::free_text())
            .await
            .map_err(BotError::Classification)?;

        match IntentLabel::parse(&raw) {
            Some(label) => {
                tracing::debug!(intent = %label, "classified");
                Ok(label)
            }
            None => {
                tracing::warn!(raw = %raw.trim(), "classifier returned an unknown label");
                Err(BotError::UnroutableIntent(raw.trim().to_string()))
            }
        }
    }
}

fn build_prompt(message: &str, turns: &[Turn], limit: usize) -> String {
    format!(
        r#"You are a bus ticket booking assistant.

You are given the user's last {limit} messages and the assistant's replies:
CHAT_HISTORY:
{history}

Your job:
1. Read the full chat history and identify what the user is currently trying to do.
2. Use the latest user message to determine the intent in context.

INTENT RULES (choose EXACTLY ONE):
- general_chat       -> greetings (hi, hello), gratitude (thank you), casual chat, off-topic questions
- ask_for_info       -> user asks about routes, dropping points, fare, timing, seat availability
- provider_info      -> user asks about bus company details
- book_ticket        -> user is trying to book/confirm a ticket
- view_ticket        -> user wants to see previously booked tickets
- cancel_ticket      -> user wants to cancel a ticket

LATEST USER MESSAGE:
{message}

Output:
Return ONLY the intent name, nothing else."#,
        history = format_history(turns),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    #[test]
    fn test_parse_tolerates_wrapping() {
        assert_eq!(IntentLabel::parse("book_ticket"), Some(IntentLabel::BookTicket));
        assert_eq!(IntentLabel::parse("  `Cancel_Ticket`.\n"), Some(IntentLabel::CancelTicket));
        assert_eq!(IntentLabel::parse("\"view_ticket\""), Some(IntentLabel::ViewTicket));
        assert_eq!(IntentLabel::parse("xyz"), None);
        assert_eq!(IntentLabel::parse("book ticket"), None);
        assert_eq!(IntentLabel::parse(""), None);
    }

    #[tokio::test]
    async fn test_unknown_label_is_unroutable() {
        let llm = Arc::new(ScriptedLlmClient::new(["xyz"]));
        let classifier = IntentClassifier::new(llm, 10);
        match classifier.classify("hello", &[]).await {
            Err(BotError::UnroutableIntent(label)) => assert_eq!(label, "xyz"),
            other => panic!("expected unroutable intent, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_prompt_uses_history_window() {
        let llm = Arc::new(ScriptedLlmClient::new(["general_chat"]));
        let classifier = IntentClassifier::new(llm.clone(), 2);
        let turns: Vec<Turn> = (0..4).map(|i| Turn::new(format!("old{i}"), "ok")).collect();

        let label = classifier.classify("thanks!", &turns).await.unwrap();
        assert_eq!(label, IntentLabel::GeneralChat);

        let prompt = llm.calls()[0].text();
        assert!(!prompt.contains("old1"));
        assert!(prompt.contains("old2"));
        assert!(prompt.contains("old3"));
        assert!(prompt.contains("thanks!"));
    }
}
