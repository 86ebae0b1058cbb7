//! 线路咨询（ask_for_info）
//!
//! 先用结构化输出抽取出发地与目的地；抽取失败时退回一次基于原始数据集的自由回答。
//! 两地齐全时回复完全由数据集计算得出，不再调用模型。本 handler 不写暂存状态。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::HandlerError;
use crate::dialogue::intent::IntentLabel;
use crate::dialogue::state::{format_history, ThreadManager};
use crate::llm::{parse_structured, schema_hint, CompletionOptions, LlmClient, Message};
use crate::store::{Dataset, District};

use super::{require_dataset, taka, HandlerContext, HandlerReply, IntentHandler};

const UNAVAILABLE: &str =
    "Sorry, I couldn't load the route information right now. Please try again later.";

/// 模型抽取结果
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct RouteExtraction {
    /// 出发区县，无法确定时为 null
    #[serde(default)]
    pub from_district: Option<String>,
    /// 目的区县，无法确定时为 null
    #[serde(default)]
    pub to_district: Option<String>,
    /// 无法确定的字段名："from_district" 和/或 "to_district"
    #[serde(default)]
    pub missing_fields: Vec<String>,
}

pub struct RouteInfoHandler {
    llm: Arc<dyn LlmClient>,
    threads: ThreadManager,
    history_limit: usize,
}

impl RouteInfoHandler {
    pub fn new(llm: Arc<dyn LlmClient>, threads: ThreadManager, history_limit: usize) -> Self {
        Self {
            llm,
            threads,
            history_limit,
        }
    }

    async fn extract(
        &self,
        message: &str,
        history: &str,
        district_names: &[&str],
    ) -> Result<RouteExtraction, HandlerError> {
        let prompt = format!(
            r#"You are given the user's latest message, recent chat history, and the list of districts we serve.
Determine the most likely departure (from_district) and destination (to_district) districts the user is asking about.
Only use district names from this list: {names}.

Return a JSON object matching this schema:
{schema}

CHAT HISTORY:
{history}

LATEST USER MESSAGE:
{message}"#,
            names = district_names.join(", "),
            schema = schema_hint::<RouteExtraction>(),
        );
        let raw = self
            .llm
            .complete(
                &[Message::user(prompt)],
                &CompletionOptions::structured().with_temperature(0.0),
            )
            .await?;
        Ok(parse_structured(&raw)?)
    }

    async fn freeform(&self, message: &str, history: &str, dataset: &Dataset) -> Result<String, HandlerError> {
        let districts = serde_json::to_string(&dataset.districts).unwrap_or_default();
        let providers = serde_json::to_string(&dataset.bus_providers).unwrap_or_default();
        let prompt = format!(
            r#"You are a bus route search assistant.

Use the conversation history and the structured data to answer the user's question with accurate, concise information.

CHAT HISTORY:
{history}

USER MESSAGE:
{message}

DISTRICTS WITH DROPPING POINTS:
{districts}

BUS PROVIDERS:
{providers}

Rules:
- Mention only bus providers that cover both the departure and destination districts.
- Reference the relevant dropping points and fares when possible.
- Keep the response short and natural. Do NOT respond in JSON."#
        );
        let reply = self
            .llm
            .complete(&[Message::user(prompt)], &CompletionOptions::free_text())
            .await?;
        Ok(reply.trim().to_string())
    }
}

#[async_trait]
impl IntentHandler for RouteInfoHandler {
    fn label(&self) -> IntentLabel {
        IntentLabel::AskForInfo
    }

    async fn handle(&self, ctx: &HandlerContext) -> Result<HandlerReply, HandlerError> {
        let dataset = require_dataset(self.threads.store().as_ref(), UNAVAILABLE).await?;
        let district_names = dataset.district_names();

        let turns = self.threads.recent_turns(ctx.thread_id(), self.history_limit).await?;
        let history = format_history(&turns);

        let extraction = match self.extract(&ctx.message, &history, &district_names).await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(thread_id = %ctx.thread_id(), "route extraction failed, answering free-form: {}", e);
                let text = self.freeform(&ctx.message, &history, &dataset).await?;
                return Ok(HandlerReply::new(text));
            }
        };

        // 名称统一为数据集中的写法；不认识的名称视为缺失
        let from = extraction
            .from_district
            .as_deref()
            .and_then(|n| dataset.district(n));
        let to = extraction
            .to_district
            .as_deref()
            .and_then(|n| dataset.district(n));

        let mut missing: Vec<&str> = Vec::new();
        if from.is_none() || extraction.missing_fields.iter().any(|f| f == "from_district") {
            missing.push("from_district");
        }
        if to.is_none() || extraction.missing_fields.iter().any(|f| f == "to_district") {
            missing.push("to_district");
        }

        match (from, to) {
            (Some(from), Some(to)) if missing.is_empty() => {
                Ok(HandlerReply::new(compose_summary(&dataset, &from.name, to)))
            }
            _ => Ok(HandlerReply::new(missing_fields_prompt(&missing, &district_names))),
        }
    }
}

/// 只询问缺失的字段，并列出全部可选区县
pub fn missing_fields_prompt(missing: &[&str], district_names: &[&str]) -> String {
    let readable = district_names.join(", ");
    let mut prompts = Vec::new();
    if missing.contains(&"from_district") {
        prompts.push(format!(
            "Which district are you departing from? We currently support {}.",
            readable
        ));
    }
    if missing.contains(&"to_district") {
        prompts.push(format!(
            "Where do you want to travel to? I can share details for {}.",
            readable
        ));
    }
    if prompts.is_empty() {
        prompts.push(
            "Could you clarify both your departure and destination districts so I can check the right buses?"
                .to_string(),
        );
    }
    prompts.join(" ")
}

/// 线路摘要：确认句、覆盖两地的供应商、目的地下车点及票价、票价区间
pub fn compose_summary(dataset: &Dataset, from: &str, to: &District) -> String {
    let mut lines = vec![format!("Yes, buses operate from {} to {}.", from, to.name)];

    let providers: Vec<&str> = dataset
        .providers_covering(from, &to.name)
        .into_iter()
        .map(|p| p.name.as_str())
        .collect();
    if providers.is_empty() {
        lines.push("I couldn't find a provider in our data that serves both districts directly.".to_string());
    } else {
        lines.push(format!(
            "Available operators covering both districts: {}.",
            providers.join(", ")
        ));
    }

    let points: Vec<String> = to
        .dropping_points
        .iter()
        .filter(|p| !p.name.is_empty())
        .map(|p| match p.price {
            Some(price) => format!("{} ({})", p.name, taka(price)),
            None => p.name.clone(),
        })
        .collect();
    if !points.is_empty() {
        lines.push(format!("Common dropping points in {}: {}.", to.name, points.join(", ")));
    }

    let prices: Vec<f64> = to.dropping_points.iter().filter_map(|p| p.price).collect();
    if let (Some(min), Some(max)) = (
        prices.iter().copied().reduce(f64::min),
        prices.iter().copied().reduce(f64::max),
    ) {
        lines.push(format!(
            "Fares typically range from {} to {} per seat.",
            taka(min),
            taka(max)
        ));
    }

    lines.push("Let me know if you need schedules or seat availability details.".to_string());
    lines.join("\n")
}
