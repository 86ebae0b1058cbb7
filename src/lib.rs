//! Busbot - 长途汽车票务对话助手
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **observability**: 日志初始化
//! - **core**: 错误类型与用户可见文案
//! - **llm**: 文本补全与嵌入客户端（OpenAI 兼容 / DeepSeek / Mock）、结构化输出解析
//! - **retrieval**: 供应商文档的向量检索与入库
//! - **store**: 线程、暂存状态、线路数据集与订单的存储（内存 / SQLite）
//! - **dialogue**: 意图识别、六个意图 handler 与编排器
//! - **api**: HTTP 接口（web feature）

#[cfg(feature = "web")]
pub mod api;
pub mod config;
pub mod core;
pub mod dialogue;
pub mod llm;
pub mod observability;
pub mod retrieval;
pub mod store;

pub use dialogue::{ChatRequest, ChatResponse, Orchestrator};
