//! LLM 层：文本补全 / 嵌入客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）与结构化输出解析

pub mod deepseek;
pub mod embedding;
pub mod message;
pub mod mock;
pub mod openai;
pub mod structured;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT};
pub use embedding::OpenAiEmbedder;
pub use message::{Message, Role};
pub use mock::{MockEmbedder, MockLlmClient, RecordedCall, ScriptedLlmClient};
pub use openai::OpenAiClient;
pub use structured::{parse_structured, schema_hint, strip_code_fence, StructuredOutputError};
pub use traits::{CompletionOptions, EmbeddingProvider, LlmClient, LlmError, ResponseMode};

fn has_key(var: &str) -> bool {
    std::env::var(var)
        .map(|k| !k.is_empty() && k != "sk-placeholder")
        .unwrap_or(false)
}

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = Duration::from_secs(cfg.llm.timeouts.request);
    let use_deepseek = has_key("DEEPSEEK_API_KEY") && provider == "deepseek";
    let use_openai = has_key("OPENAI_API_KEY");

    if use_deepseek {
        let client = create_deepseek_client(&cfg.llm);
        tracing::info!("Using DeepSeek LLM ({})", client.model());
        Arc::new(client)
    } else if use_openai {
        tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
        Arc::new(
            OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, None)
                .with_timeout(timeout),
        )
    } else {
        tracing::warn!("No API key set, using Mock LLM (replies are echoes)");
        Arc::new(MockLlmClient)
    }
}

/// 嵌入后端：有 OPENAI_API_KEY 时走 OpenAI，否则使用本地哈希向量
pub fn create_embedder_from_config(cfg: &AppConfig) -> Arc<dyn EmbeddingProvider> {
    if has_key("OPENAI_API_KEY") {
        tracing::info!("Using OpenAI embeddings ({})", cfg.llm.embedding_model);
        Arc::new(
            OpenAiEmbedder::new(cfg.llm.base_url.as_deref(), &cfg.llm.embedding_model, None)
                .with_timeout(Duration::from_secs(cfg.llm.timeouts.request)),
        )
    } else {
        tracing::warn!("No OPENAI_API_KEY, using hashed bag-of-words embeddings");
        Arc::new(MockEmbedder::default())
    }
}
