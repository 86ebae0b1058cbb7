//! 订票（book_ticket）
//!
//! 每轮只调用一次模型：输入数据集、最近 15 轮、当前草稿与新消息，模型返回
//! ask_info / confirm_booking / complete_booking 之一以及更新后的草稿。
//! 草稿在保存或落单前都会按数据集校验：上下车点必须属于对应区县，供应商必须覆盖两地，
//! 票价始终取下车点价格。校验不通过的字段被清空并重新询问，绝不落单。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::core::{ErrorKind, HandlerError};
use crate::dialogue::intent::IntentLabel;
use crate::dialogue::state::{format_history, BookingDraft, ThreadManager};
use crate::llm::{parse_structured, CompletionOptions, LlmClient, Message};
use crate::store::{Booking, BookingStatus, Dataset, PaymentStatus, SideSlot};

use super::{require_dataset, require_thread, taka, HandlerContext, HandlerReply, IntentHandler};

const UNAVAILABLE: &str = "Sorry, the booking system is currently unavailable.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingAction {
    AskInfo,
    ConfirmBooking,
    CompleteBooking,
}

/// 模型每轮返回的决策
#[derive(Debug, Clone, Deserialize)]
pub struct BookingDecision {
    pub action: BookingAction,
    #[serde(default)]
    pub updated_booking_data: BookingDraft,
    #[serde(default)]
    pub response_to_user: String,
}

/// 草稿校验结果
#[derive(Debug, Default, PartialEq)]
pub struct DraftCheck {
    /// 被拒绝的字段说明（字段已从草稿中清空）
    pub issues: Vec<String>,
    /// 尚未提供的必填字段
    pub missing: Vec<&'static str>,
}

impl DraftCheck {
    pub fn is_complete(&self) -> bool {
        self.issues.is_empty() && self.missing.is_empty()
    }
}

pub struct BookingHandler {
    llm: Arc<dyn LlmClient>,
    threads: ThreadManager,
    history_limit: usize,
}

impl BookingHandler {
    pub fn new(llm: Arc<dyn LlmClient>, threads: ThreadManager, history_limit: usize) -> Self {
        Self {
            llm,
            threads,
            history_limit,
        }
    }

    /// 先清除草稿再写入订单：被超时打断时不会出现订单已写入而草稿仍在的情况。
    /// 写入失败时放回草稿。
    async fn persist(&self, ctx: &HandlerContext, draft: &BookingDraft) -> Result<Booking, HandlerError> {
        let booking = build_booking(ctx, draft)
            .ok_or_else(|| HandlerError::new(ErrorKind::Extraction, "validated draft is incomplete"))?;
        self.threads
            .clear_side_state(ctx.thread_id(), SideSlot::BookingData)
            .await?;
        if let Err(e) = self.threads.store().insert_booking(booking.clone()).await {
            if let Err(restore) = self.threads.set_side_state(ctx.thread_id(), draft).await {
                tracing::warn!(thread_id = %ctx.thread_id(), "failed to restore booking draft: {}", restore);
            }
            return Err(e.into());
        }
        tracing::info!(
            booking_id = %booking.booking_id,
            thread_id = %ctx.thread_id(),
            total = booking.total_amount,
            "booking confirmed"
        );
        Ok(booking)
    }
}

#[async_trait]
impl IntentHandler for BookingHandler {
    fn label(&self) -> IntentLabel {
        IntentLabel::BookTicket
    }

    async fn handle(&self, ctx: &HandlerContext) -> Result<HandlerReply, HandlerError> {
        let dataset = require_dataset(self.threads.store().as_ref(), UNAVAILABLE).await?;
        require_thread(&self.threads, ctx).await?;

        let turns = self.threads.recent_turns(ctx.thread_id(), self.history_limit).await?;
        let existing = self.threads.side_state::<BookingDraft>(ctx.thread_id()).await?;

        let prompt = build_prompt(ctx, &dataset, &format_history(&turns), existing.as_ref());
        let raw = self
            .llm
            .complete(
                &[Message::user(prompt)],
                &CompletionOptions::structured().with_temperature(0.3),
            )
            .await?;
        let decision: BookingDecision = parse_structured(&raw)?;

        let mut draft = merge_draft(existing.unwrap_or_default(), decision.updated_booking_data);
        let check = validate_draft(&mut draft, &dataset, ctx.now.date_naive());
        tracing::debug!(
            thread_id = %ctx.thread_id(),
            action = ?decision.action,
            issues = check.issues.len(),
            missing = ?check.missing,
            "booking turn"
        );

        match decision.action {
            BookingAction::CompleteBooking if check.is_complete() => {
                let booking = self.persist(ctx, &draft).await?;
                Ok(HandlerReply::new(confirmation_card(&booking)))
            }
            BookingAction::CompleteBooking | BookingAction::ConfirmBooking if !check.is_complete() => {
                self.threads.set_side_state(ctx.thread_id(), &draft).await?;
                Ok(HandlerReply::new(correction_prompt(&check)))
            }
            _ => {
                self.threads.set_side_state(ctx.thread_id(), &draft).await?;
                let mut text = decision.response_to_user.trim().to_string();
                if !check.issues.is_empty() {
                    text = format!("{}\n\n{}", check.issues.join("\n"), text);
                }
                Ok(HandlerReply::new(text))
            }
        }
    }
}

/// 新值中的非空字段覆盖旧草稿
pub fn merge_draft(mut base: BookingDraft, update: BookingDraft) -> BookingDraft {
    macro_rules! take {
        ($($field:ident),*) => {
            $(if update.$field.is_some() { base.$field = update.$field; })*
        };
    }
    take!(district_from, district_to, pickup_point, dropping_point, bus_provider, name, phone, date, seats, fare);
    base
}

/// 按数据集校验草稿：名称规范为数据集写法，非法字段清空，票价按下车点重置
pub fn validate_draft(draft: &mut BookingDraft, dataset: &Dataset, today: NaiveDate) -> DraftCheck {
    let mut check = DraftCheck::default();
    let district_list = dataset.district_names().join(", ");

    let resolve_district = |value: &mut Option<String>, check: &mut DraftCheck| {
        let name = value.take()?;
        match dataset.district(&name) {
            Some(d) => {
                *value = Some(d.name.clone());
                Some(d)
            }
            None => {
                check.issues.push(format!(
                    "\"{}\" is not one of our districts. We cover: {}.",
                    name, district_list
                ));
                None
            }
        }
    };
    let from = resolve_district(&mut draft.district_from, &mut check);
    let to = resolve_district(&mut draft.district_to, &mut check);

    if let Some(pickup) = draft.pickup_point.take() {
        match from {
            Some(from) => match from.point(&pickup) {
                Some(p) => draft.pickup_point = Some(p.name.clone()),
                None => check.issues.push(format!(
                    "\"{}\" is not a pickup point in {}. Available pickup points: {}.",
                    pickup,
                    from.name,
                    from.dropping_points.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ")
                )),
            },
            // 出发地未定时保留，待出发地确定后再校验
            None => draft.pickup_point = Some(pickup),
        }
    }

    draft.fare = None;
    if let Some(dropping) = draft.dropping_point.take() {
        match to {
            Some(to) => {
                let options = to
                    .dropping_points
                    .iter()
                    .map(|p| match p.price {
                        Some(price) => format!("{} ({})", p.name, taka(price)),
                        None => p.name.clone(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                match to.point(&dropping) {
                    Some(p) => match p.price {
                        Some(price) => {
                            draft.dropping_point = Some(p.name.clone());
                            draft.fare = Some(price);
                        }
                        None => check.issues.push(format!(
                            "{} has no listed fare. Please choose another dropping point in {}: {}.",
                            p.name, to.name, options
                        )),
                    },
                    None => check.issues.push(format!(
                        "\"{}\" is not a dropping point in {}. Available dropping points: {}.",
                        dropping, to.name, options
                    )),
                }
            }
            None => draft.dropping_point = Some(dropping),
        }
    }

    if let Some(provider) = draft.bus_provider.take() {
        match dataset.provider(&provider) {
            None => check.issues.push(format!(
                "\"{}\" is not one of our bus providers.",
                provider
            )),
            Some(p) => match (from, to) {
                (Some(from), Some(to)) if !(p.covers(&from.name) && p.covers(&to.name)) => {
                    let available: Vec<&str> = dataset
                        .providers_covering(&from.name, &to.name)
                        .into_iter()
                        .map(|p| p.name.as_str())
                        .collect();
                    check.issues.push(format!(
                        "{} does not serve {} to {}. Available providers: {}.",
                        p.name,
                        from.name,
                        to.name,
                        if available.is_empty() { "none".to_string() } else { available.join(", ") }
                    ));
                }
                _ => draft.bus_provider = Some(p.name.clone()),
            },
        }
    }

    if draft.seats == Some(0) {
        draft.seats = None;
        check.issues.push("Number of seats must be at least 1.".to_string());
    }

    if let Some(date) = draft.date.take() {
        match NaiveDate::parse_from_str(&date, "%Y-%m-%d") {
            Ok(d) if d >= today => draft.date = Some(d.format("%Y-%m-%d").to_string()),
            _ => check.issues.push(format!(
                "\"{}\" is not a valid travel date. Please use YYYY-MM-DD, today ({}) or later.",
                date,
                today.format("%Y-%m-%d")
            )),
        }
    }

    let required: [(&'static str, bool); 9] = [
        ("district_from", draft.district_from.is_some()),
        ("district_to", draft.district_to.is_some()),
        ("pickup_point", draft.pickup_point.is_some()),
        ("dropping_point", draft.dropping_point.is_some()),
        ("bus_provider", draft.bus_provider.is_some()),
        ("name", draft.name.is_some()),
        ("phone", draft.phone.is_some()),
        ("date", draft.date.is_some()),
        ("seats", draft.seats.is_some()),
    ];
    check.missing = required
        .into_iter()
        .filter(|(_, present)| !present)
        .map(|(field, _)| field)
        .collect();
    check
}

/// 校验通过的草稿生成订单；total = fare × seats
fn build_booking(ctx: &HandlerContext, draft: &BookingDraft) -> Option<Booking> {
    let fare = draft.fare?;
    let seats = draft.seats?;
    Some(Booking {
        booking_id: uuid::Uuid::new_v4().to_string(),
        user_id: ctx.thread.user_id.clone(),
        name: draft.name.clone()?,
        phone: draft.phone.clone()?,
        district_from: draft.district_from.clone()?,
        district_to: draft.district_to.clone()?,
        pickup_point: draft.pickup_point.clone()?,
        dropping_point: draft.dropping_point.clone()?,
        bus_provider: draft.bus_provider.clone()?,
        date: draft.date.clone()?,
        seats,
        fare,
        total_amount: fare * f64::from(seats),
        payment_status: PaymentStatus::Pending,
        status: BookingStatus::Confirmed,
        booked_at: ctx.now,
        cancelled_at: None,
    })
}

fn field_label(field: &str) -> &'static str {
    match field {
        "district_from" => "departure district",
        "district_to" => "destination district",
        "pickup_point" => "pickup point",
        "dropping_point" => "dropping point",
        "bus_provider" => "bus provider",
        "name" => "passenger name",
        "phone" => "phone number",
        "date" => "travel date (YYYY-MM-DD)",
        "seats" => "number of seats",
        _ => "details",
    }
}

fn correction_prompt(check: &DraftCheck) -> String {
    let mut lines = vec!["I can't complete the booking yet.".to_string()];
    lines.extend(check.issues.iter().cloned());
    if !check.missing.is_empty() {
        let fields: Vec<&str> = check.missing.iter().map(|f| field_label(f)).collect();
        lines.push(format!("I still need your {}.", fields.join(", ")));
    }
    lines.join("\n")
}

fn confirmation_card(b: &Booking) -> String {
    format!(
        "✅ Booking Confirmed!\n\n\
         🎫 Booking ID: {}\n\
         👤 Name: {}\n\
         📞 Phone: {}\n\
         🚌 Bus Provider: {}\n\
         📍 District From: {}\n\
         📍 District To: {}\n\
         🔵 Pickup Point: {}\n\
         🔴 Dropping Point: {}\n\
         📅 Date: {}\n\
         💺 Seats: {}\n\
         💰 Fare per seat: {}\n\
         💵 Total Amount: {}\n\
         💳 Payment Status: {}\n\n\
         Your ticket has been successfully booked! 🎉",
        b.booking_id,
        b.name,
        b.phone,
        b.bus_provider,
        b.district_from,
        b.district_to,
        b.pickup_point,
        b.dropping_point,
        b.date,
        b.seats,
        taka(b.fare),
        taka(b.total_amount),
        b.payment_status.as_str(),
    )
}

fn build_prompt(ctx: &HandlerContext, dataset: &Dataset, history: &str, draft: Option<&BookingDraft>) -> String {
    let data = serde_json::to_string_pretty(dataset).unwrap_or_default();
    let current = match draft {
        Some(d) => serde_json::to_string_pretty(d).unwrap_or_default(),
        None => "No data collected yet".to_string(),
    };
    format!(
        r#"You are an intelligent booking assistant. Handle the entire booking conversation naturally.

CURRENT DATE: {today}

AVAILABLE DATA:
{data}

CONVERSATION HISTORY:
{history}

CURRENT BOOKING DATA (if any):
{current}

USER'S CURRENT MESSAGE:
{message}

YOUR TASK:
1. Analyze the conversation and current booking data
2. Extract any new information from the user's message
3. Validate that pickup_point is from district_from's dropping_points and dropping_point is from district_to's dropping_points
4. Set fare from the dropping_point's price when dropping_point is selected
5. Determine the next action (ask for info, confirm, or complete booking)
6. Ask for missing information in a natural way

BOOKING FIELDS NEEDED:
- district_from: District name (must be from available districts)
- district_to: District name (must be from available districts)
- pickup_point: Pickup location (must be from district_from's dropping_points)
- dropping_point: Dropping location (must be from district_to's dropping_points)
- bus_provider: Must cover both district_from and district_to
- name: Full name
- phone: Phone number
- date: Travel date (YYYY-MM-DD format)
- seats: Number of seats (integer)
- fare: Price per seat (from dropping_point)

IMPORTANT RULES:
- District names like "Dhaka", "Bogra" are NOT pickup/dropping points
- For pickup points don't show the price
- Always show price for dropping point
- Only offer bus providers covering both selected districts
- Use "confirm_booking" once every field is known, and show the details to the user
- Use "complete_booking" only when the user confirms (yes, confirm, ok, ...) and all data is complete

RESPONSE FORMAT (JSON):
{{
    "action": "ask_info" | "confirm_booking" | "complete_booking",
    "updated_booking_data": {{
        "district_from": "value or null",
        "district_to": "value or null",
        "pickup_point": "value or null",
        "dropping_point": "value or null",
        "bus_provider": "value or null",
        "name": "value or null",
        "phone": "value or null",
        "date": "YYYY-MM-DD or null",
        "seats": number or null,
        "fare": number or null
    }},
    "response_to_user": "Your natural conversational response here"
}}

Return ONLY the JSON response, nothing else."#,
        today = ctx.today(),
        message = ctx.message,
    )
}
