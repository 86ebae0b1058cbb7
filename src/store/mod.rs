//! 存储抽象层
//!
//! 定义对话线程、暂存槽位、线路数据集与订单的统一存储接口，支持内存和 SQLite 两种实现。
//! 所有写操作只作用于单个线程或单个订单，不需要跨记录事务。

pub mod loader;
pub mod memory;
pub mod models;
#[cfg(feature = "async-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::StoreSection;

pub use loader::{load_dataset_file, seed_dataset};
pub use memory::MemoryStore;
pub use models::{
    phone_matches, Booking, BookingQuery, BookingStatus, BusProvider, Dataset, District,
    DroppingPoint, PaymentStatus, SideSlot, ThreadRecord, Turn,
};
#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("stored document is corrupt: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "async-sqlite")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// 持久化存储接口
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// 按 thread_id 查找线程（不含轮次）
    async fn find_thread(&self, thread_id: &str) -> Result<Option<ThreadRecord>, StoreError>;

    /// 新建空线程
    async fn insert_thread(&self, thread: ThreadRecord) -> Result<(), StoreError>;

    /// 追加一轮对话；线程不存在时返回 false 且不报错
    async fn push_turn(&self, thread_id: &str, turn: Turn) -> Result<bool, StoreError>;

    /// 最近 limit 轮，按时间正序
    async fn recent_turns(&self, thread_id: &str, limit: usize) -> Result<Vec<Turn>, StoreError>;

    async fn get_side_state(
        &self,
        thread_id: &str,
        slot: SideSlot,
    ) -> Result<Option<serde_json::Value>, StoreError>;

    /// 覆盖写入槽位；线程不存在时不做任何事
    async fn set_side_state(
        &self,
        thread_id: &str,
        slot: SideSlot,
        value: serde_json::Value,
    ) -> Result<(), StoreError>;

    async fn unset_side_state(&self, thread_id: &str, slot: SideSlot) -> Result<(), StoreError>;

    /// 单例线路数据快照
    async fn load_dataset(&self) -> Result<Option<Dataset>, StoreError>;

    async fn replace_dataset(&self, dataset: Dataset) -> Result<(), StoreError>;

    async fn insert_booking(&self, booking: Booking) -> Result<(), StoreError>;

    /// 满足条件的订单，按 booked_at 倒序
    async fn find_bookings(&self, query: &BookingQuery) -> Result<Vec<Booking>, StoreError>;

    async fn find_booking(&self, query: &BookingQuery) -> Result<Option<Booking>, StoreError> {
        Ok(self.find_bookings(query).await?.into_iter().next())
    }

    /// 将 confirmed 订单置为 cancelled；返回受影响的订单数（0 或 1）
    async fn cancel_booking(
        &self,
        booking_id: &str,
        cancelled_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

/// 创建存储
///
/// backend = "sqlite" 且启用了 async-sqlite feature 时使用 SQLite；否则使用内存存储
pub async fn create_store(cfg: &StoreSection) -> Arc<dyn ConversationStore> {
    #[cfg(feature = "async-sqlite")]
    if cfg.backend.eq_ignore_ascii_case("sqlite") {
        let timeout = std::time::Duration::from_secs(cfg.acquire_timeout_secs);
        match SqliteStore::new(&cfg.sqlite_path, timeout).await {
            Ok(store) => {
                tracing::info!("Using SQLite store: {:?}", cfg.sqlite_path);
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!("Failed to open SQLite store, falling back to memory: {}", e);
            }
        }
    }

    #[cfg(not(feature = "async-sqlite"))]
    if cfg.backend.eq_ignore_ascii_case("sqlite") {
        tracing::warn!("SQLite store requested but async-sqlite feature not enabled, using memory store");
    }

    tracing::info!("Using in-memory store");
    Arc::new(MemoryStore::new())
}
