//! 对话编排：解析线程 → 意图识别 → 执行一个 handler → 写入一轮对话
//!
//! 意图到 handler 是一张普通的分发表，每次请求恰好一次识别、一次 handler 调用。
//! 同一线程上的请求串行执行；handler 的失败在这里统一转成用户可见文案，并照常写入轮次。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::{AppConfig, AppSection, DialogueSection};
use crate::core::{BotError, ErrorKind, HandlerError};
use crate::llm::{create_embedder_from_config, create_llm_from_config, EmbeddingProvider, LlmClient};
use crate::retrieval::{create_retriever_from_config, seed_documents, SemanticRetriever};
use crate::store::{create_store, seed_dataset, ConversationStore};

use super::handlers::{
    BookingHandler, CancelTicketHandler, GeneralChatHandler, HandlerContext, IntentHandler,
    ProviderInfoHandler, RouteInfoHandler, ViewTicketHandler,
};
use super::intent::{IntentClassifier, IntentLabel};
use super::state::ThreadManager;

/// 入站消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub user_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub thread_id: String,
    pub response: String,
}

/// 启动时构造一次、注入编排器的服务句柄
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub llm: Arc<dyn LlmClient>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub retriever: Arc<dyn SemanticRetriever>,
    pub store: Arc<dyn ConversationStore>,
    pub dialogue: DialogueSection,
    pub retrieval_top_k: usize,
}

impl OrchestratorDeps {
    pub async fn from_config(cfg: &AppConfig) -> Self {
        let deps = Self {
            llm: create_llm_from_config(cfg),
            embedder: create_embedder_from_config(cfg),
            retriever: create_retriever_from_config(&cfg.retrieval),
            store: create_store(&cfg.store).await,
            dialogue: cfg.dialogue.clone(),
            retrieval_top_k: cfg.retrieval.top_k,
        };
        deps.load_data(&cfg.app).await;
        deps
    }

    /// 数据集写入存储，索引中缺失的供应商文档嵌入后写入检索后端；失败只记录警告
    pub async fn load_data(&self, app: &AppSection) {
        seed_dataset(self.store.as_ref(), &app.dataset_path).await;
        seed_documents(&app.documents_dir, self.embedder.as_ref(), self.retriever.as_ref()).await;
    }
}

pub struct Orchestrator {
    threads: ThreadManager,
    classifier: IntentClassifier,
    handlers: HashMap<IntentLabel, Arc<dyn IntentHandler>>,
    handler_timeout: Duration,
    expose_error_details: bool,
    /// 线程级互斥，空闲条目在下次取锁时清理
    thread_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        let threads = ThreadManager::new(deps.store.clone());
        let short = deps.dialogue.classifier_history;

        let handlers: Vec<Arc<dyn IntentHandler>> = vec![
            Arc::new(GeneralChatHandler::new(deps.llm.clone())),
            Arc::new(RouteInfoHandler::new(deps.llm.clone(), threads.clone(), short)),
            Arc::new(ProviderInfoHandler::new(
                deps.llm.clone(),
                deps.embedder.clone(),
                deps.retriever.clone(),
                deps.retrieval_top_k,
            )),
            Arc::new(BookingHandler::new(
                deps.llm.clone(),
                threads.clone(),
                deps.dialogue.booking_history,
            )),
            Arc::new(ViewTicketHandler::new(deps.llm.clone(), threads.clone(), short)),
            Arc::new(CancelTicketHandler::new(deps.llm.clone(), threads.clone(), short)),
        ];

        let mut orchestrator = Self {
            threads,
            classifier: IntentClassifier::new(deps.llm, short),
            handlers: HashMap::new(),
            handler_timeout: Duration::from_secs(deps.dialogue.handler_timeout_secs.max(1)),
            expose_error_details: deps.dialogue.expose_error_details,
            thread_locks: Mutex::new(HashMap::new()),
        };
        for handler in handlers {
            orchestrator.register(handler);
        }
        orchestrator
    }

    /// 按配置创建全部服务，载入数据集并补齐供应商文档索引
    pub async fn from_config(cfg: &AppConfig) -> Self {
        Self::new(OrchestratorDeps::from_config(cfg).await)
    }

    /// 注册或替换某个意图的 handler
    pub fn register(&mut self, handler: Arc<dyn IntentHandler>) {
        self.handlers.insert(handler.label(), handler);
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn threads(&self) -> &ThreadManager {
        &self.threads
    }

    async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.thread_locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(thread_id.to_string()).or_default().clone()
    }

    /// 处理一条消息
    ///
    /// 识别失败（含未知标签）直接返回 Err，不执行 handler、不写入轮次；
    /// handler 失败则转为错误文案，照常写入并返回。
    pub async fn process(&self, req: ChatRequest) -> Result<ChatResponse, BotError> {
        let thread = self
            .threads
            .resolve_or_create_thread(&req.user_id, req.thread_id.as_deref())
            .await?;
        let thread_id = thread.thread_id.clone();

        let lock = self.thread_lock(&thread_id).await;
        let _guard = lock.lock().await;

        let turns = self
            .threads
            .recent_turns(&thread_id, self.classifier.history_limit())
            .await?;
        let label = self.classifier.classify(&req.message, &turns).await?;
        let handler = self
            .handlers
            .get(&label)
            .ok_or_else(|| BotError::UnroutableIntent(label.to_string()))?;

        let ctx = HandlerContext::new(thread, req.message.clone());
        let result = tokio::time::timeout(self.handler_timeout, handler.handle(&ctx))
            .await
            .unwrap_or_else(|_| {
                Err(HandlerError::new(
                    ErrorKind::Timeout,
                    format!("{} did not finish within {}s", label, self.handler_timeout.as_secs()),
                ))
            });

        let response = match result {
            Ok(reply) => reply.text,
            Err(e) => {
                match e.kind {
                    ErrorKind::MissingData => tracing::warn!(thread_id = %thread_id, intent = %label, "{}", e),
                    _ => tracing::error!(thread_id = %thread_id, intent = %label, "handler failed: {}", e),
                }
                e.user_message(self.expose_error_details)
            }
        };

        self.threads
            .append_turn(&thread_id, &req.message, &response)
            .await?;
        tracing::info!(thread_id = %thread_id, intent = %label, "turn completed");

        Ok(ChatResponse { thread_id, response })
    }
}
