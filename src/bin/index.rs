//! 供应商文档入库
//!
//! 读取 [app].documents_dir 下的 *.txt，为索引中尚不存在的文件生成嵌入并写入检索后端。
//! 用法：busbot-index [config.toml]

use std::path::PathBuf;

use anyhow::Context;
use busbot::config::load_config;
use busbot::llm::create_embedder_from_config;
use busbot::observability;
use busbot::retrieval::{create_retriever_from_config, index_documents, load_documents};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let docs = load_documents(&cfg.app.documents_dir)
        .with_context(|| format!("Failed to read documents from {:?}", cfg.app.documents_dir))?;
    tracing::info!("{} documents found in {:?}", docs.len(), cfg.app.documents_dir);

    let embedder = create_embedder_from_config(&cfg);
    let retriever = create_retriever_from_config(&cfg.retrieval);
    let report = index_documents(docs, embedder.as_ref(), retriever.as_ref())
        .await
        .context("Indexing failed")?;

    tracing::info!(
        total = report.total,
        skipped = report.skipped,
        uploaded = report.uploaded,
        "indexing finished"
    );
    Ok(())
}
