//! 内存存储：进程内 HashMap，供测试与本地运行使用

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::models::{Booking, BookingQuery, BookingStatus, Dataset, SideSlot, ThreadRecord, Turn};
use super::{ConversationStore, StoreError};

struct ThreadDoc {
    record: ThreadRecord,
    turns: Vec<Turn>,
    side: HashMap<SideSlot, serde_json::Value>,
}

#[derive(Default)]
pub struct MemoryStore {
    threads: RwLock<HashMap<String, ThreadDoc>>,
    dataset: RwLock<Option<Dataset>>,
    bookings: RwLock<Vec<Booking>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(dataset: Dataset) -> Self {
        Self {
            dataset: RwLock::new(Some(dataset)),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn find_thread(&self, thread_id: &str) -> Result<Option<ThreadRecord>, StoreError> {
        Ok(self
            .threads
            .read()
            .await
            .get(thread_id)
            .map(|d| d.record.clone()))
    }

    async fn insert_thread(&self, thread: ThreadRecord) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        threads.insert(
            thread.thread_id.clone(),
            ThreadDoc {
                record: thread,
                turns: Vec::new(),
                side: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn push_turn(&self, thread_id: &str, turn: Turn) -> Result<bool, StoreError> {
        let mut threads = self.threads.write().await;
        match threads.get_mut(thread_id) {
            Some(doc) => {
                doc.turns.push(turn);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn recent_turns(&self, thread_id: &str, limit: usize) -> Result<Vec<Turn>, StoreError> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(thread_id)
            .map(|doc| {
                let start = doc.turns.len().saturating_sub(limit);
                doc.turns[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn get_side_state(
        &self,
        thread_id: &str,
        slot: SideSlot,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(thread_id)
            .and_then(|doc| doc.side.get(&slot).cloned()))
    }

    async fn set_side_state(
        &self,
        thread_id: &str,
        slot: SideSlot,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        if let Some(doc) = threads.get_mut(thread_id) {
            doc.side.insert(slot, value);
        }
        Ok(())
    }

    async fn unset_side_state(&self, thread_id: &str, slot: SideSlot) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        if let Some(doc) = threads.get_mut(thread_id) {
            doc.side.remove(&slot);
        }
        Ok(())
    }

    async fn load_dataset(&self) -> Result<Option<Dataset>, StoreError> {
        Ok(self.dataset.read().await.clone())
    }

    async fn replace_dataset(&self, dataset: Dataset) -> Result<(), StoreError> {
        *self.dataset.write().await = Some(dataset);
        Ok(())
    }

    async fn insert_booking(&self, booking: Booking) -> Result<(), StoreError> {
        let mut bookings = self.bookings.write().await;
        if bookings.iter().any(|b| b.booking_id == booking.booking_id) {
            return Err(StoreError::Backend(format!(
                "duplicate booking_id {}",
                booking.booking_id
            )));
        }
        bookings.push(booking);
        Ok(())
    }

    async fn find_bookings(&self, query: &BookingQuery) -> Result<Vec<Booking>, StoreError> {
        let bookings = self.bookings.read().await;
        // 倒序遍历后稳定排序：booked_at 相同时后插入的在前
        let mut found: Vec<Booking> = bookings
            .iter()
            .rev()
            .filter(|b| query.matches(b))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.booked_at.cmp(&a.booked_at));
        Ok(found)
    }

    async fn cancel_booking(
        &self,
        booking_id: &str,
        cancelled_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut bookings = self.bookings.write().await;
        let mut affected = 0;
        for b in bookings
            .iter_mut()
            .filter(|b| b.booking_id == booking_id && b.status == BookingStatus::Confirmed)
        {
            b.status = BookingStatus::Cancelled;
            b.cancelled_at = Some(cancelled_at);
            affected += 1;
        }
        Ok(affected)
    }
}
