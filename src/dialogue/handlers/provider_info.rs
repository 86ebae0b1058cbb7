//! 供应商咨询：嵌入用户问题，检索最相近的介绍文档，只依据该文档作答

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::HandlerError;
use crate::dialogue::intent::IntentLabel;
use crate::llm::{CompletionOptions, EmbeddingProvider, LlmClient, Message};
use crate::retrieval::SemanticRetriever;

use super::{HandlerContext, HandlerReply, IntentHandler};

pub const NOT_FOUND: &str = "No relevant information found for this provider.";

const SYSTEM_PROMPT: &str =
    "Answer based only on the provided context. Do not use any outside knowledge; if the context does not contain the answer, say so.";

pub struct ProviderInfoHandler {
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn EmbeddingProvider>,
    retriever: Arc<dyn SemanticRetriever>,
    top_k: usize,
}

impl ProviderInfoHandler {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn EmbeddingProvider>,
        retriever: Arc<dyn SemanticRetriever>,
        top_k: usize,
    ) -> Self {
        Self {
            llm,
            embedder,
            retriever,
            top_k: top_k.max(1),
        }
    }
}

#[async_trait]
impl IntentHandler for ProviderInfoHandler {
    fn label(&self) -> IntentLabel {
        IntentLabel::ProviderInfo
    }

    async fn handle(&self, ctx: &HandlerContext) -> Result<HandlerReply, HandlerError> {
        let vector = self.embedder.embed(&ctx.message).await?;
        let matches = self.retriever.query(&vector, self.top_k).await?;
        if matches.is_empty() {
            return Ok(HandlerReply::new(NOT_FOUND));
        }
        tracing::debug!(
            thread_id = %ctx.thread_id(),
            source = %matches[0].id,
            score = matches[0].score,
            "provider document retrieved"
        );

        let context = matches
            .iter()
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Use the following context to answer the user query.\n\nContext:\n{}\n\nUser Query:\n{}\n\nAnswer:",
            context, ctx.message
        );
        let answer = self
            .llm
            .complete(
                &[Message::system(SYSTEM_PROMPT), Message::user(prompt)],
                &CompletionOptions::free_text(),
            )
            .await?;
        Ok(HandlerReply::new(answer.trim()))
    }
}
