//! 存储层数据模型：对话线程、轮次、线路数据集、订单

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// 一轮对话（用户消息 + 机器人回复），写入后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub user: String,
    pub bot: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(user: impl Into<String>, bot: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            bot: bot.into(),
            timestamp: Utc::now(),
        }
    }
}

/// 线程元数据（不含轮次日志）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub thread_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl ThreadRecord {
    pub fn new(thread_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            user_id: user_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// 线程上按流程划分的暂存槽位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideSlot {
    BookingData,
    CancelData,
    ViewTicketPhone,
}

impl SideSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            SideSlot::BookingData => "booking_data",
            SideSlot::CancelData => "cancel_data",
            SideSlot::ViewTicketPhone => "view_ticket_phone",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "booking_data" => Some(SideSlot::BookingData),
            "cancel_data" => Some(SideSlot::CancelData),
            "view_ticket_phone" => Some(SideSlot::ViewTicketPhone),
            _ => None,
        }
    }
}

impl fmt::Display for SideSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 下车点（也用作上车点）；price 仅在为数字时保留
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppingPoint {
    pub name: String,
    #[serde(default, deserialize_with = "numeric_or_none")]
    pub price: Option<f64>,
}

fn numeric_or_none<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_f64()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct District {
    pub name: String,
    #[serde(default)]
    pub dropping_points: Vec<DroppingPoint>,
}

impl District {
    pub fn point(&self, name: &str) -> Option<&DroppingPoint> {
        self.dropping_points
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusProvider {
    pub name: String,
    #[serde(default)]
    pub coverage_districts: Vec<String>,
}

impl BusProvider {
    /// 覆盖关系按名称精确（区分大小写）匹配
    pub fn covers(&self, district: &str) -> bool {
        self.coverage_districts.iter().any(|d| d == district)
    }
}

/// 线路数据快照：票价与覆盖关系的唯一来源
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub districts: Vec<District>,
    #[serde(default)]
    pub bus_providers: Vec<BusProvider>,
}

impl Dataset {
    /// 按名称查找区县（不区分大小写）
    pub fn district(&self, name: &str) -> Option<&District> {
        self.districts
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn district_names(&self) -> Vec<&str> {
        self.districts
            .iter()
            .map(|d| d.name.as_str())
            .filter(|n| !n.is_empty())
            .collect()
    }

    /// 同时覆盖两个区县的供应商
    pub fn providers_covering(&self, from: &str, to: &str) -> Vec<&BusProvider> {
        self.bus_providers
            .iter()
            .filter(|p| p.covers(from) && p.covers(to))
            .collect()
    }

    pub fn provider(&self, name: &str) -> Option<&BusProvider> {
        self.bus_providers
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            _ => None,
        }
    }
}

/// 已确认或已取消的车票订单；total_amount 在创建时计算，此后不再重算
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: String,
    pub user_id: String,
    pub name: String,
    pub phone: String,
    pub district_from: String,
    pub district_to: String,
    pub pickup_point: String,
    pub dropping_point: String,
    pub bus_provider: String,
    /// 出行日期 YYYY-MM-DD
    pub date: String,
    pub seats: u32,
    pub fare: f64,
    pub total_amount: f64,
    pub payment_status: PaymentStatus,
    pub status: BookingStatus,
    pub booked_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// 订单查询条件；phone 为不区分大小写的子串匹配
#[derive(Debug, Clone, Default)]
pub struct BookingQuery {
    pub phone: Option<String>,
    pub booking_id: Option<String>,
    pub date: Option<String>,
    pub status: Option<BookingStatus>,
}

impl BookingQuery {
    pub fn by_phone(phone: impl Into<String>) -> Self {
        Self {
            phone: Some(phone.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: BookingStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_booking_id(mut self, booking_id: impl Into<String>) -> Self {
        self.booking_id = Some(booking_id.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        if let Some(phone) = &self.phone {
            if !phone_matches(&booking.phone, phone) {
                return false;
            }
        }
        if let Some(id) = &self.booking_id {
            if &booking.booking_id != id {
                return false;
            }
        }
        if let Some(date) = &self.date {
            if &booking.date != date {
                return false;
            }
        }
        if let Some(status) = self.status {
            if booking.status != status {
                return false;
            }
        }
        true
    }
}

/// 存储号码包含查询号码（不区分大小写，"+" 按字面匹配）
pub fn phone_matches(stored: &str, query: &str) -> bool {
    let query = query.trim();
    !query.is_empty() && stored.to_lowercase().contains(&query.to_lowercase())
}
