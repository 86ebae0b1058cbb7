//! 错误类型与用户可见文案
//!
//! BotError：编排层（意图路由、线程解析）失败，直接返回给调用方。
//! HandlerError：handler 内部失败，由 Orchestrator 按 ErrorKind 统一转换为回复文本。

use std::fmt;

use thiserror::Error;

use crate::llm::{LlmError, StructuredOutputError};
use crate::retrieval::RetrievalError;
use crate::store::StoreError;

/// 编排层错误：没有 handler 被执行，也不会写入对话轮次
#[derive(Error, Debug)]
pub enum BotError {
    /// 分类器返回了六个意图之外的标签
    #[error("Unroutable intent: {0:?}")]
    UnroutableIntent(String),

    #[error("Intent classification failed: {0}")]
    Classification(#[source] LlmError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// handler 失败的分类，决定用户看到的文案
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 结构化输出缺失或无法解析
    Extraction,
    /// 文本补全 / 嵌入 / 检索服务调用失败
    Service,
    /// 存储读写失败
    Store,
    /// 前置数据缺失（数据集未加载、线程不存在），detail 即为给用户的固定文案
    MissingData,
    /// handler 执行超时
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Extraction => "extraction",
            ErrorKind::Service => "service",
            ErrorKind::Store => "store",
            ErrorKind::MissingData => "missing_data",
            ErrorKind::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind} error: {detail}")]
pub struct HandlerError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn missing_data(user_message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingData, user_message)
    }

    /// 用户可见回复；expose_details 为 true 时附带错误原文
    pub fn user_message(&self, expose_details: bool) -> String {
        let base = match self.kind {
            ErrorKind::MissingData => return self.detail.clone(),
            ErrorKind::Extraction => {
                "Sorry, I couldn't understand that properly. Could you rephrase it?"
            }
            ErrorKind::Service => {
                "Sorry, I'm having trouble reaching one of my services. Please try again in a moment."
            }
            ErrorKind::Store => {
                "Sorry, I couldn't access your booking records right now. Please try again later."
            }
            ErrorKind::Timeout => "Sorry, that took too long. Please try again.",
        };
        if expose_details {
            format!("{} (error: {})", base, self.detail)
        } else {
            base.to_string()
        }
    }
}

impl From<LlmError> for HandlerError {
    fn from(e: LlmError) -> Self {
        HandlerError::new(ErrorKind::Service, e.to_string())
    }
}

impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        HandlerError::new(ErrorKind::Store, e.to_string())
    }
}

impl From<RetrievalError> for HandlerError {
    fn from(e: RetrievalError) -> Self {
        HandlerError::new(ErrorKind::Service, e.to_string())
    }
}

impl From<StructuredOutputError> for HandlerError {
    fn from(e: StructuredOutputError) -> Self {
        HandlerError::new(ErrorKind::Extraction, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_data_is_shown_verbatim() {
        let err = HandlerError::missing_data("Sorry, the booking system is currently unavailable.");
        assert_eq!(
            err.user_message(true),
            "Sorry, the booking system is currently unavailable."
        );
    }

    #[test]
    fn test_details_hidden_by_default() {
        let err = HandlerError::new(ErrorKind::Extraction, "expected value at line 1 column 1");
        assert!(!err.user_message(false).contains("line 1"));
        assert!(err.user_message(true).contains("expected value at line 1 column 1"));
    }

    #[test]
    fn test_conversions_pick_kind() {
        let e: HandlerError = LlmError::ApiError("boom".into()).into();
        assert_eq!(e.kind, ErrorKind::Service);
        let e: HandlerError = StoreError::Backend("locked".into()).into();
        assert_eq!(e.kind, ErrorKind::Store);
    }
}
