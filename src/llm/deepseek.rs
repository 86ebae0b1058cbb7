//! DeepSeek 后端：chat 接口与 OpenAI 兼容，只替换 base_url 与模型名；不提供 embeddings

use std::time::Duration;

use crate::config::LlmSection;
use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// [llm].model 不是 deepseek 模型时（如默认的 gpt-4o-mini）退回 deepseek-chat
fn deepseek_model(configured: &str) -> &str {
    if configured.starts_with("deepseek") {
        configured
    } else {
        DEEPSEEK_CHAT
    }
}

/// 按 [llm] 段创建 DeepSeek 客户端，Key 取 DEEPSEEK_API_KEY
pub fn create_deepseek_client(llm: &LlmSection) -> OpenAiClient {
    let api_key = std::env::var("DEEPSEEK_API_KEY").ok();
    let base_url = llm.base_url.as_deref().unwrap_or(DEEPSEEK_BASE_URL);

    OpenAiClient::new(Some(base_url), deepseek_model(&llm.model), api_key.as_deref())
        .with_timeout(Duration::from_secs(llm.timeouts.request))
}
