//! 语义检索层
//!
//! 供应商问答按向量检索最相近的介绍文档。后端可以是 Pinecone 兼容的 HTTP 索引，
//! 也可以是进程内线性扫描（测试与离线运行）。

pub mod indexer;
pub mod memory;
pub mod pinecone;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RetrievalSection;

pub use indexer::{index_documents, load_documents, seed_documents, Document, IndexError, IndexReport};
pub use memory::InMemoryRetriever;
pub use pinecone::PineconeRetriever;

#[derive(Error, Debug, Clone)]
pub enum RetrievalError {
    #[error("retrieval request failed: {0}")]
    Request(String),

    #[error("retrieval service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid retrieval response: {0}")]
    InvalidResponse(String),

    #[error("retrieval not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for RetrievalError {
    fn from(e: reqwest::Error) -> Self {
        RetrievalError::Request(e.to_string())
    }
}

/// 一条命中结果；metadata 原样保留索引中的键值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMatch {
    pub id: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RetrievalMatch {
    /// metadata.text，缺失时为空串
    pub fn text(&self) -> &str {
        self.metadata
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("")
    }
}

/// 待写入索引的向量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[async_trait]
pub trait SemanticRetriever: Send + Sync {
    /// 按相似度降序返回至多 top_k 条
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievalMatch>, RetrievalError>;

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize, RetrievalError>;

    /// 给定 id 中已存在于索引里的那些
    async fn existing_ids(&self, ids: &[String]) -> Result<Vec<String>, RetrievalError>;
}

/// 按配置创建检索后端
///
/// backend = "pinecone" 需要 index_host 与 API Key（配置或 PINECONE_API_KEY）；缺失时回落到内存索引
pub fn create_retriever_from_config(cfg: &RetrievalSection) -> Arc<dyn SemanticRetriever> {
    if cfg.backend.eq_ignore_ascii_case("pinecone") {
        let api_key = cfg
            .api_key
            .clone()
            .or_else(|| std::env::var("PINECONE_API_KEY").ok());
        match (cfg.index_host.as_deref(), api_key) {
            (Some(host), Some(key)) => {
                match PineconeRetriever::new(host, &key, std::time::Duration::from_secs(cfg.timeout_secs)) {
                    Ok(r) => {
                        tracing::info!("Using Pinecone retriever: {}", host);
                        return Arc::new(r);
                    }
                    Err(e) => tracing::warn!("Failed to build Pinecone client, using in-memory index: {}", e),
                }
            }
            _ => tracing::warn!(
                "Pinecone retriever requested but index_host or PINECONE_API_KEY is missing, using in-memory index"
            ),
        }
    }
    tracing::info!("Using in-memory retriever");
    Arc::new(InMemoryRetriever::new())
}
