//! 退票：两阶段确认状态机
//!
//! - 收集阶段：抽取手机号 / 订单号 / 出行日期，与已有草稿合并（新值为空不覆盖旧值）。
//!   缺手机号则询问；只有手机号则列出可退订单；信息足够则锁定唯一订单并请求确认。
//! - 确认阶段：消息命中确认关键词时把订单从 confirmed 改为 cancelled 并清除草稿；
//!   未命中则回到收集阶段。

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::core::HandlerError;
use crate::dialogue::intent::IntentLabel;
use crate::dialogue::state::{format_history, CancelDraft, ThreadManager};
use crate::llm::{parse_structured, CompletionOptions, LlmClient, Message};
use crate::store::{BookingQuery, BookingStatus, SideSlot};

use super::view_ticket::ticket_card;
use super::{require_thread, HandlerContext, HandlerReply, IntentHandler};

/// 整词 / 整短语匹配，不区分大小写；不处理否定（"I'm not sure" 仍算确认）
const CONFIRMATION_PATTERN: &str = r"(?i)\b(yes|confirm|cancel it|proceed|ok|sure|definitely)\b";

static CONFIRMATION_RE: OnceLock<Option<Regex>> = OnceLock::new();

pub const ASK_PHONE: &str = "To cancel a ticket, I need your phone number.\n\n\
Please provide:\n📞 Your phone number (e.g., 01712345678)";

pub const NO_MATCH: &str = "❌ No matching ticket found.\n\n\
Possible reasons:\n\
- Booking ID or date is incorrect\n\
- Ticket is already cancelled\n\
- Phone number doesn't match\n\n\
Please verify your information and try again.";

pub const CANCEL_FAILED: &str = "Failed to cancel the ticket. Please try again or contact support.";

/// 消息是否表示确认
pub fn is_confirmation(message: &str) -> bool {
    CONFIRMATION_RE
        .get_or_init(|| Regex::new(CONFIRMATION_PATTERN).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(message))
}

#[derive(Debug, Default, Deserialize)]
struct CancelExtraction {
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    booking_id: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

/// 合并抽取结果；空值与 "null" 不覆盖已有字段
fn merge(draft: &mut CancelDraft, extracted: CancelExtraction) {
    let clean = |v: Option<String>| {
        v.map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
    };
    if let Some(phone) = clean(extracted.phone) {
        draft.phone = Some(phone);
    }
    if let Some(id) = clean(extracted.booking_id) {
        draft.booking_id = Some(id);
    }
    if let Some(date) = clean(extracted.date) {
        draft.date = Some(date);
    }
}

pub struct CancelTicketHandler {
    llm: Arc<dyn LlmClient>,
    threads: ThreadManager,
    history_limit: usize,
}

impl CancelTicketHandler {
    pub fn new(llm: Arc<dyn LlmClient>, threads: ThreadManager, history_limit: usize) -> Self {
        Self {
            llm,
            threads,
            history_limit,
        }
    }

    async fn confirm(&self, ctx: &HandlerContext, draft: &CancelDraft) -> Result<HandlerReply, HandlerError> {
        let Some(booking_id) = draft.booking_id.as_deref() else {
            return Ok(HandlerReply::new(CANCEL_FAILED));
        };
        let affected = self
            .threads
            .store()
            .cancel_booking(booking_id, ctx.now)
            .await?;
        if affected == 0 {
            tracing::warn!(booking_id = %booking_id, "cancellation matched no confirmed booking");
            return Ok(HandlerReply::new(CANCEL_FAILED));
        }

        self.threads
            .clear_side_state(ctx.thread_id(), SideSlot::CancelData)
            .await?;
        tracing::info!(booking_id = %booking_id, thread_id = %ctx.thread_id(), "booking cancelled");
        Ok(HandlerReply::new(format!(
            "✅ Ticket Cancelled Successfully!\n\n\
             Booking ID: {}\n\
             Status: CANCELLED\n\
             Cancelled at: {}\n\n\
             Your ticket has been cancelled. If you paid online, the refund will be processed within 5-7 business days.",
            booking_id,
            ctx.now.format("%Y-%m-%d %H:%M:%S UTC")
        )))
    }

    async fn collect(&self, ctx: &HandlerContext, mut draft: CancelDraft) -> Result<HandlerReply, HandlerError> {
        let turns = self.threads.recent_turns(ctx.thread_id(), self.history_limit).await?;
        let existing = serde_json::to_string(&draft).unwrap_or_default();
        let prompt = format!(
            r#"You are a ticket cancellation assistant. Extract the phone number and booking identifier from the conversation.

CHAT HISTORY:
{history}

CURRENT USER MESSAGE:
{message}

EXISTING CANCEL DATA (if any):
{existing}

Extract the following information:
- phone: Phone number
- booking_id: Booking ID (if provided)
- date: Travel date (if provided as identifier, format: YYYY-MM-DD)

RULES:
1. Booking ID takes priority over date for identification
2. Only extract clearly stated information
3. Use existing data if not provided again
4. Today's date is {today}

Return ONLY a JSON object:
{{
    "phone": "value or null",
    "booking_id": "value or null",
    "date": "YYYY-MM-DD or null"
}}"#,
            history = format_history(&turns),
            message = ctx.message,
            today = ctx.today(),
        );
        let raw = self
            .llm
            .complete(
                &[Message::user(prompt)],
                &CompletionOptions::structured().with_temperature(0.0),
            )
            .await?;
        let extracted: CancelExtraction = parse_structured(&raw)?;
        merge(&mut draft, extracted);

        let Some(phone) = draft.phone.clone() else {
            self.threads.set_side_state(ctx.thread_id(), &draft).await?;
            return Ok(HandlerReply::new(ASK_PHONE));
        };

        let store = self.threads.store();

        if draft.booking_id.is_none() && draft.date.is_none() {
            let bookings = store
                .find_bookings(&BookingQuery::by_phone(&phone).with_status(BookingStatus::Confirmed))
                .await?;
            if bookings.is_empty() {
                return Ok(HandlerReply::new(format!(
                    "No active tickets found for phone number: {}\n\n\
                     Please check if:\n\
                     - The phone number is correct\n\
                     - You have any confirmed bookings that can be cancelled",
                    phone
                )));
            }

            self.threads.set_side_state(ctx.thread_id(), &draft).await?;
            let options: Vec<String> = bookings
                .iter()
                .enumerate()
                .map(|(i, b)| {
                    format!(
                        "🎫 Option {}:\n   Booking ID: {}\n   Date: {}\n   Route: {} → {}\n   Seats: {}",
                        i + 1,
                        b.booking_id,
                        b.date,
                        b.pickup_point,
                        b.dropping_point,
                        b.seats
                    )
                })
                .collect();
            return Ok(HandlerReply::new(format!(
                "📱 Active tickets for {}:\n\n{}\n\n\
                 Please provide either:\n\
                 - Booking ID (e.g., abc123-def456)\n\
                 - Travel date (e.g., 2024-12-25)",
                phone,
                options.join("\n\n")
            )));
        }

        // 订单号优先于日期
        let mut query = BookingQuery::by_phone(&phone).with_status(BookingStatus::Confirmed);
        query = match (&draft.booking_id, &draft.date) {
            (Some(id), _) => query.with_booking_id(id.clone()),
            (None, Some(date)) => query.with_date(date.clone()),
            (None, None) => query,
        };

        let Some(booking) = store.find_booking(&query).await? else {
            self.threads
                .clear_side_state(ctx.thread_id(), SideSlot::CancelData)
                .await?;
            return Ok(HandlerReply::new(NO_MATCH));
        };

        draft.booking_id = Some(booking.booking_id.clone());
        draft.awaiting_confirmation = true;
        self.threads.set_side_state(ctx.thread_id(), &draft).await?;

        Ok(HandlerReply::new(format!(
            "⚠️ Confirm Ticket Cancellation\n\n{}\n\n\
             Are you sure you want to cancel this ticket?\n\
             Type 'yes' to confirm or 'no' to keep the booking.",
            ticket_card(&booking)
        )))
    }
}

#[async_trait]
impl IntentHandler for CancelTicketHandler {
    fn label(&self) -> IntentLabel {
        IntentLabel::CancelTicket
    }

    async fn handle(&self, ctx: &HandlerContext) -> Result<HandlerReply, HandlerError> {
        require_thread(&self.threads, ctx).await?;
        let draft = self
            .threads
            .side_state::<CancelDraft>(ctx.thread_id())
            .await?
            .unwrap_or_default();

        if draft.awaiting_confirmation && is_confirmation(&ctx.message) {
            return self.confirm(ctx, &draft).await;
        }
        self.collect(ctx, draft).await
    }
}
