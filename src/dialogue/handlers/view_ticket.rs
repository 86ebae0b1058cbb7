//! 查票：抽取手机号（可沿用上次缓存的号码），列出该号码下的全部订单

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::HandlerError;
use crate::dialogue::intent::IntentLabel;
use crate::dialogue::state::{format_history, ThreadManager, ViewPhoneCache};
use crate::llm::{CompletionOptions, LlmClient, Message};
use crate::store::{Booking, BookingQuery, BookingStatus};

use super::{require_thread, taka, HandlerContext, HandlerReply, IntentHandler};

/// 模型找不到号码时返回的哨兵值
pub const NOT_FOUND_SENTINEL: &str = "NOT_FOUND";

pub const ASK_PHONE: &str = "I need your phone number to retrieve your tickets.\n\n\
Please provide the phone number you used when booking.\n\
Example: 01712345678 or +8801712345678";

pub struct ViewTicketHandler {
    llm: Arc<dyn LlmClient>,
    threads: ThreadManager,
    history_limit: usize,
}

impl ViewTicketHandler {
    pub fn new(llm: Arc<dyn LlmClient>, threads: ThreadManager, history_limit: usize) -> Self {
        Self {
            llm,
            threads,
            history_limit,
        }
    }
}

#[async_trait]
impl IntentHandler for ViewTicketHandler {
    fn label(&self) -> IntentLabel {
        IntentLabel::ViewTicket
    }

    async fn handle(&self, ctx: &HandlerContext) -> Result<HandlerReply, HandlerError> {
        require_thread(&self.threads, ctx).await?;
        let turns = self.threads.recent_turns(ctx.thread_id(), self.history_limit).await?;
        let cached = self.threads.side_state::<ViewPhoneCache>(ctx.thread_id()).await?;

        let prompt = format!(
            r#"You are a ticket viewing assistant. Extract the phone number from the conversation.

CHAT HISTORY:
{history}

CURRENT USER MESSAGE:
{message}

STORED PHONE (if any):
{stored}

Extract the phone number that the user wants to check tickets for.
Return ONLY the phone number, nothing else. If no phone number is found, return "{sentinel}".

Examples:
- "show my tickets" -> use the chat history or stored phone
- "my number is +8801712345678" -> +8801712345678
- "check tickets for 01812345678" -> 01812345678"#,
            history = format_history(&turns),
            message = ctx.message,
            stored = cached.as_ref().map(|c| c.phone.as_str()).unwrap_or("None"),
            sentinel = NOT_FOUND_SENTINEL,
        );
        let raw = self
            .llm
            .complete(
                &[Message::user(prompt)],
                &CompletionOptions::free_text().with_temperature(0.0),
            )
            .await?;

        let Some(phone) = extracted_phone(&raw) else {
            return Ok(HandlerReply::new(ASK_PHONE));
        };

        self.threads
            .set_side_state(ctx.thread_id(), &ViewPhoneCache { phone: phone.clone() })
            .await?;

        let bookings = self
            .threads
            .store()
            .find_bookings(&BookingQuery::by_phone(&phone))
            .await?;
        if bookings.is_empty() {
            return Ok(HandlerReply::new(format!(
                "No tickets found for phone number: {}\n\n\
                 Please check if:\n\
                 - The phone number is correct\n\
                 - You have any confirmed bookings",
                phone
            )));
        }

        let cards: Vec<String> = bookings
            .iter()
            .enumerate()
            .map(|(i, b)| format!("🎫 Ticket #{}\n{}", i + 1, ticket_card(b)))
            .collect();
        Ok(HandlerReply::new(format!(
            "📱 Tickets for {}:\n\n{}\n\nTotal tickets: {}\n\nTo cancel a ticket, please provide the booking ID.",
            phone,
            cards.join("\n\n"),
            bookings.len()
        )))
    }
}

/// 模型输出中的号码；哨兵或空串为 None
fn extracted_phone(raw: &str) -> Option<String> {
    let phone = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    if phone.is_empty() || phone.eq_ignore_ascii_case(NOT_FOUND_SENTINEL) {
        None
    } else {
        Some(phone.to_string())
    }
}

/// 订单详情卡片（查票与退票确认共用）
pub(crate) fn ticket_card(b: &Booking) -> String {
    let status_mark = match b.status {
        BookingStatus::Confirmed => "✅",
        BookingStatus::Cancelled => "❌",
    };
    let mut card = format!(
        "{} Status: {}\n\
         📋 Booking ID: {}\n\
         👤 Name: {}\n\
         📞 Phone: {}\n\
         🚌 Bus Provider: {}\n\
         📍 From: {} ({})\n\
         📍 To: {} ({})\n\
         📅 Date: {}\n\
         💺 Seats: {}\n\
         💰 Fare per seat: {}\n\
         💵 Total Amount: {}\n\
         💳 Payment Status: {}\n\
         🕐 Booked: {}",
        status_mark,
        b.status.as_str().to_uppercase(),
        b.booking_id,
        b.name,
        b.phone,
        b.bus_provider,
        b.pickup_point,
        b.district_from,
        b.dropping_point,
        b.district_to,
        b.date,
        b.seats,
        taka(b.fare),
        taka(b.total_amount),
        b.payment_status.as_str(),
        b.booked_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    if let Some(at) = b.cancelled_at {
        card.push_str(&format!("\n🚫 Cancelled: {}", at.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    card
}
