//! 意图处理器
//!
//! 每个意图对应一个 IntentHandler；handler 之间互不调用，一次请求只执行一个。
//! 失败统一以 HandlerError 返回，由 Orchestrator 决定给用户的文案。

pub mod booking;
pub mod cancel_ticket;
pub mod general_chat;
pub mod provider_info;
pub mod route_info;
pub mod view_ticket;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::HandlerError;
use crate::store::{ConversationStore, Dataset, ThreadRecord};

use super::intent::IntentLabel;
use super::state::ThreadManager;

pub use booking::BookingHandler;
pub use cancel_ticket::{is_confirmation, CancelTicketHandler};
pub use general_chat::GeneralChatHandler;
pub use provider_info::ProviderInfoHandler;
pub use route_info::RouteInfoHandler;
pub use view_ticket::ViewTicketHandler;

/// 一次 handler 调用的输入
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub thread: ThreadRecord,
    pub message: String,
    /// 请求时刻；prompt 中的“今天”和订单时间戳都取这个值
    pub now: DateTime<Utc>,
}

impl HandlerContext {
    pub fn new(thread: ThreadRecord, message: impl Into<String>) -> Self {
        Self {
            thread,
            message: message.into(),
            now: Utc::now(),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread.thread_id
    }

    pub fn today(&self) -> String {
        self.now.format("%Y-%m-%d").to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandlerReply {
    pub text: String,
}

impl HandlerReply {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
pub trait IntentHandler: Send + Sync {
    fn label(&self) -> IntentLabel;

    async fn handle(&self, ctx: &HandlerContext) -> Result<HandlerReply, HandlerError>;
}

pub(crate) const NO_HISTORY: &str = "Sorry, I couldn't find your conversation history.";

/// 线程必须仍然存在，否则返回固定提示
pub(crate) async fn require_thread(threads: &ThreadManager, ctx: &HandlerContext) -> Result<(), HandlerError> {
    match threads.find_thread(ctx.thread_id()).await? {
        Some(_) => Ok(()),
        None => Err(HandlerError::missing_data(NO_HISTORY)),
    }
}

/// 读取数据集快照；缺失时返回带给定文案的 MissingData
pub(crate) async fn require_dataset(
    store: &dyn ConversationStore,
    unavailable: &str,
) -> Result<Dataset, HandlerError> {
    store
        .load_dataset()
        .await?
        .ok_or_else(|| HandlerError::missing_data(unavailable))
}

/// 金额显示：整数不带小数位
pub(crate) fn taka(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("৳{}", amount as i64)
    } else {
        format!("৳{:.2}", amount)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! handler 测试共用的数据

    use crate::store::{Booking, BookingStatus, Dataset, PaymentStatus};

    pub fn dataset() -> Dataset {
        serde_json::from_str(
            r#"{
                "districts": [
                    {"name": "Dhaka", "dropping_points": [
                        {"name": "Gabtoli", "price": 0},
                        {"name": "Kallyanpur", "price": 0}
                    ]},
                    {"name": "Bogra", "dropping_points": [
                        {"name": "Satmatha", "price": 550},
                        {"name": "Thanthania", "price": 600},
                        {"name": "Charmatha", "price": "ask"}
                    ]},
                    {"name": "Sylhet", "dropping_points": [
                        {"name": "Kadamtali", "price": 700}
                    ]}
                ],
                "bus_providers": [
                    {"name": "Shyamoli", "coverage_districts": ["Dhaka", "Bogra"]},
                    {"name": "Hanif", "coverage_districts": ["Dhaka", "Bogra", "Sylhet"]},
                    {"name": "Ena", "coverage_districts": ["Dhaka", "Sylhet"]}
                ]
            }"#,
        )
        .unwrap()
    }

    pub fn booking(id: &str, phone: &str, date: &str) -> Booking {
        Booking {
            booking_id: id.to_string(),
            user_id: "u1".to_string(),
            name: "Rahim".to_string(),
            phone: phone.to_string(),
            district_from: "Dhaka".to_string(),
            district_to: "Bogra".to_string(),
            pickup_point: "Gabtoli".to_string(),
            dropping_point: "Satmatha".to_string(),
            bus_provider: "Shyamoli".to_string(),
            date: date.to_string(),
            seats: 2,
            fare: 550.0,
            total_amount: 1100.0,
            payment_status: PaymentStatus::Pending,
            status: BookingStatus::Confirmed,
            booked_at: chrono::Utc::now(),
            cancelled_at: None,
        }
    }
}
