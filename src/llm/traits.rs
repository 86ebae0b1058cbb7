//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient；嵌入后端实现 EmbeddingProvider。

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::Message;

/// 文本补全 / 嵌入服务错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("LLM API error: {0}")]
    ApiError(String),

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("Invalid LLM request: {0}")]
    InvalidRequest(String),

    #[error("LLM returned an empty response")]
    EmptyResponse,
}

/// 输出模式：自由文本或 JSON 对象
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    #[default]
    FreeText,
    StructuredJson,
}

/// 单次补全调用的参数
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionOptions {
    pub mode: ResponseMode,
    /// None 时使用服务端默认值
    pub temperature: Option<f32>,
}

impl CompletionOptions {
    pub fn free_text() -> Self {
        Self::default()
    }

    pub fn structured() -> Self {
        Self {
            mode: ResponseMode::StructuredJson,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<String, LlmError>;
}

/// 嵌入提供方：将文本编码为向量
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}
