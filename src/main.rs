//! Busbot 命令行
//!
//! 入口：初始化日志、加载配置与数据集、创建编排器，从标准输入逐行读取消息。
//! 用法：busbot [config.toml] ；环境变量 BUSBOT_USER 指定用户（默认 cli-user）

use std::path::PathBuf;

use anyhow::Context;
use busbot::config::load_config;
use busbot::core::BotError;
use busbot::{observability, ChatRequest, Orchestrator};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let orchestrator = Orchestrator::from_config(&cfg).await;

    let user_id = std::env::var("BUSBOT_USER").unwrap_or_else(|_| "cli-user".to_string());
    let mut thread_id: Option<String> = None;

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    stdout
        .write_all(b"Busbot ready. Type a message, /new for a new conversation, /quit to exit.\n> ")
        .await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let message = line.trim();
        match message {
            "" => {}
            "/quit" | "/exit" => break,
            "/new" => {
                thread_id = None;
                stdout.write_all(b"(new conversation)\n").await?;
            }
            _ => {
                let req = ChatRequest {
                    message: message.to_string(),
                    user_id: user_id.clone(),
                    thread_id: thread_id.clone(),
                };
                match orchestrator.process(req).await {
                    Ok(resp) => {
                        thread_id = Some(resp.thread_id);
                        stdout.write_all(format!("{}\n", resp.response).as_bytes()).await?;
                    }
                    Err(BotError::UnroutableIntent(label)) => {
                        tracing::warn!("unroutable intent {:?}", label);
                        stdout
                            .write_all(b"Sorry, I couldn't tell what you'd like to do. Could you rephrase?\n")
                            .await?;
                    }
                    Err(e) => {
                        tracing::error!("request failed: {}", e);
                        stdout.write_all(format!("Error: {}\n", e).as_bytes()).await?;
                    }
                }
            }
        }
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }

    Ok(())
}
