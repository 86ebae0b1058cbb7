//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BUSBOT__*` 覆盖（双下划线表示嵌套，如 `BUSBOT__STORE__BACKEND=sqlite`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub retrieval: RetrievalSection,
    #[serde(default)]
    pub dialogue: DialogueSection,
    #[serde(default)]
    pub server: ServerSection,
}

/// [app] 段：应用名、数据集文件、供应商文档目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 启动时载入的线路数据（districts + bus_providers）
    #[serde(default = "default_dataset_path")]
    pub dataset_path: PathBuf,
    /// 供应商介绍文本目录（*.txt），启动时补齐到向量索引，也可用 busbot-index 单独写入
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            dataset_path: default_dataset_path(),
            documents_dir: default_documents_dir(),
        }
    }
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from("data.json")
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("data")
}

/// [llm] 段：后端选择、模型与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            embedding_model: default_embedding_model(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [store] 段：会话与订单存储后端
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// memory / sqlite
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            sqlite_path: default_sqlite_path(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

fn default_store_backend() -> String {
    "memory".to_string()
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("busbot.db")
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

/// [retrieval] 段：供应商问答使用的向量检索
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalSection {
    /// memory / pinecone
    #[serde(default = "default_retrieval_backend")]
    pub backend: String,
    /// Pinecone 索引 host，如 https://bus-providers-xxxx.svc.pinecone.io
    pub index_host: Option<String>,
    /// 未设置时读取 PINECONE_API_KEY
    pub api_key: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            backend: default_retrieval_backend(),
            index_host: None,
            api_key: None,
            top_k: default_top_k(),
            timeout_secs: default_retrieval_timeout_secs(),
        }
    }
}

fn default_retrieval_backend() -> String {
    "memory".to_string()
}

fn default_top_k() -> usize {
    1
}

fn default_retrieval_timeout_secs() -> u64 {
    15
}

/// [dialogue] 段：意图路由与各流程的历史窗口、错误暴露策略
#[derive(Debug, Clone, Deserialize)]
pub struct DialogueSection {
    /// 意图识别 / 线路 / 查票 / 退票使用的历史轮数
    #[serde(default = "default_classifier_history")]
    pub classifier_history: usize,
    /// 订票流程使用的历史轮数
    #[serde(default = "default_booking_history")]
    pub booking_history: usize,
    /// 单次 handler 执行超时（秒）
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    /// 为 true 时在回复中附带内部错误原文
    #[serde(default)]
    pub expose_error_details: bool,
}

impl Default for DialogueSection {
    fn default() -> Self {
        Self {
            classifier_history: default_classifier_history(),
            booking_history: default_booking_history(),
            handler_timeout_secs: default_handler_timeout_secs(),
            expose_error_details: false,
        }
    }
}

fn default_classifier_history() -> usize {
    10
}

fn default_booking_history() -> usize {
    15
}

fn default_handler_timeout_secs() -> u64 {
    120
}

/// [server] 段：HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// 从 config 目录加载配置，环境变量 BUSBOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BUSBOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BUSBOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.dialogue.classifier_history, 10);
        assert_eq!(cfg.dialogue.booking_history, 15);
        assert!(!cfg.dialogue.expose_error_details);
        assert_eq!(cfg.retrieval.top_k, 1);
        assert_eq!(cfg.store.backend, "memory");
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[store]\nbackend = \"sqlite\"\n\n[dialogue]\nexpose_error_details = true\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.store.backend, "sqlite");
        assert!(cfg.dialogue.expose_error_details);
        // 未出现的段回落到默认值
        assert_eq!(cfg.dialogue.booking_history, 15);
    }
}
