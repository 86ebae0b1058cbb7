//! Busbot HTTP 服务
//!
//! 启动: cargo run --bin busbot-server --features web
//! 监听地址取 [server].bind，可用 BUSBOT__SERVER__BIND 覆盖

#![cfg(feature = "web")]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use busbot::config::load_config;
use busbot::{api, observability, Orchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let orchestrator = Arc::new(Orchestrator::from_config(&cfg).await);

    let app = api::router(orchestrator);
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.bind))?;
    tracing::info!("Busbot API: http://{}", cfg.server.bind);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
