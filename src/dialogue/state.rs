//! 线程与流程暂存状态管理
//!
//! 线程只负责记录对话轮次；多轮流程（订票、退票、查票）之间的连续性完全依赖按槽位保存的暂存状态。
//! 每个槽位对应一个强类型结构，存储层只看到 JSON。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::store::{ConversationStore, SideSlot, StoreError, ThreadRecord, Turn};

/// 能存入某个槽位的类型
pub trait SlotValue: Serialize + DeserializeOwned + Send + Sync {
    const SLOT: SideSlot;
}

/// 订票草稿；所有字段都可能尚未收集
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BookingDraft {
    #[serde(default, deserialize_with = "non_empty_string")]
    pub district_from: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub district_to: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub pickup_point: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub dropping_point: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub bus_provider: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub phone: Option<String>,
    /// YYYY-MM-DD
    #[serde(default, deserialize_with = "non_empty_string")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient_seats")]
    pub seats: Option<u32>,
    /// 每座票价，由下车点价格决定
    #[serde(default, deserialize_with = "lenient_number")]
    pub fare: Option<f64>,
}

impl SlotValue for BookingDraft {
    const SLOT: SideSlot = SideSlot::BookingData;
}

/// 退票草稿；awaiting_confirmation 为 true 时 booking_id 指向待确认的订单
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancelDraft {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub booking_id: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub awaiting_confirmation: bool,
}

impl SlotValue for CancelDraft {
    const SLOT: SideSlot = SideSlot::CancelData;
}

/// 查票时缓存的手机号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewPhoneCache {
    pub phone: String,
}

impl SlotValue for ViewPhoneCache {
    const SLOT: SideSlot = SideSlot::ViewTicketPhone;
}

/// 空串与 "null" 视为缺失
fn non_empty_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() || s.eq_ignore_ascii_case("null") {
                None
            } else {
                Some(s.to_string())
            }
        }
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// 数字或数字字符串
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_seats<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_number(deserializer)?
        .filter(|n| n.fract() == 0.0 && *n >= 0.0 && *n <= u32::MAX as f64)
        .map(|n| n as u32))
}

/// 线程与暂存状态的读写入口
#[derive(Clone)]
pub struct ThreadManager {
    store: Arc<dyn ConversationStore>,
}

impl ThreadManager {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// 给定且存在的 thread_id 原样返回；否则新建一个归属 user_id 的空线程
    ///
    /// 不校验已有线程的归属，仅在不一致时记录警告
    pub async fn resolve_or_create_thread(
        &self,
        user_id: &str,
        thread_id: Option<&str>,
    ) -> Result<ThreadRecord, StoreError> {
        if let Some(id) = thread_id.map(str::trim).filter(|id| !id.is_empty()) {
            if let Some(thread) = self.store.find_thread(id).await? {
                if thread.user_id != user_id {
                    tracing::warn!(
                        thread_id = %id,
                        owner = %thread.user_id,
                        user_id = %user_id,
                        "thread reused by a different user"
                    );
                }
                return Ok(thread);
            }
        }

        let thread = ThreadRecord::new(uuid::Uuid::new_v4().to_string(), user_id);
        self.store.insert_thread(thread.clone()).await?;
        tracing::debug!(thread_id = %thread.thread_id, user_id = %user_id, "created thread");
        Ok(thread)
    }

    pub async fn find_thread(&self, thread_id: &str) -> Result<Option<ThreadRecord>, StoreError> {
        self.store.find_thread(thread_id).await
    }

    /// 追加一轮；线程已不存在时静默忽略
    pub async fn append_turn(
        &self,
        thread_id: &str,
        user_text: &str,
        bot_text: &str,
    ) -> Result<(), StoreError> {
        if !self.store.push_turn(thread_id, Turn::new(user_text, bot_text)).await? {
            tracing::debug!(thread_id = %thread_id, "turn dropped, thread not found");
        }
        Ok(())
    }

    pub async fn recent_turns(&self, thread_id: &str, n: usize) -> Result<Vec<Turn>, StoreError> {
        self.store.recent_turns(thread_id, n).await
    }

    /// 读取槽位；内容无法解析时视为不存在
    pub async fn side_state<T: SlotValue>(&self, thread_id: &str) -> Result<Option<T>, StoreError> {
        let Some(value) = self.store.get_side_state(thread_id, T::SLOT).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                tracing::warn!(thread_id = %thread_id, slot = T::SLOT.as_str(), "discarding unreadable side state: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn set_side_state<T: SlotValue>(&self, thread_id: &str, value: &T) -> Result<(), StoreError> {
        self.store
            .set_side_state(thread_id, T::SLOT, serde_json::to_value(value)?)
            .await
    }

    pub async fn clear_side_state(&self, thread_id: &str, slot: SideSlot) -> Result<(), StoreError> {
        self.store.unset_side_state(thread_id, slot).await
    }
}

/// 历史轮次转为 prompt 文本
pub fn format_history(turns: &[Turn]) -> String {
    if turns.is_empty() {
        return "No prior conversation.".to_string();
    }
    turns
        .iter()
        .map(|t| format!("User: {}\nBot: {}", t.user, t.bot))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager() -> ThreadManager {
        ThreadManager::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_resolve_creates_fresh_and_reuses_existing() {
        let threads = manager();
        let a = threads.resolve_or_create_thread("u1", None).await.unwrap();
        let b = threads.resolve_or_create_thread("u1", None).await.unwrap();
        assert_ne!(a.thread_id, b.thread_id);

        let again = threads
            .resolve_or_create_thread("u1", Some(&a.thread_id))
            .await
            .unwrap();
        assert_eq!(again.thread_id, a.thread_id);

        let unknown = threads
            .resolve_or_create_thread("u1", Some("no-such-thread"))
            .await
            .unwrap();
        assert_ne!(unknown.thread_id, "no-such-thread");
    }

    #[tokio::test]
    async fn test_other_user_may_reuse_thread() {
        let threads = manager();
        let t = threads.resolve_or_create_thread("alice", None).await.unwrap();
        let reused = threads
            .resolve_or_create_thread("bob", Some(&t.thread_id))
            .await
            .unwrap();
        assert_eq!(reused.thread_id, t.thread_id);
        assert_eq!(reused.user_id, "alice");
    }

    #[tokio::test]
    async fn test_append_is_monotonic() {
        let threads = manager();
        let t = threads.resolve_or_create_thread("u1", None).await.unwrap();
        for i in 0..5 {
            threads.append_turn(&t.thread_id, &format!("m{i}"), "r").await.unwrap();
            assert_eq!(threads.recent_turns(&t.thread_id, 100).await.unwrap().len(), i + 1);
        }
        let last = threads.recent_turns(&t.thread_id, 3).await.unwrap();
        let users: Vec<_> = last.iter().map(|t| t.user.as_str()).collect();
        assert_eq!(users, vec!["m2", "m3", "m4"]);

        threads.append_turn("gone", "x", "y").await.unwrap();
    }

    #[tokio::test]
    async fn test_typed_side_state() {
        let threads = manager();
        let t = threads.resolve_or_create_thread("u1", None).await.unwrap();
        let id = t.thread_id.as_str();

        assert!(threads.side_state::<CancelDraft>(id).await.unwrap().is_none());
        let draft = CancelDraft {
            phone: Some("01712345678".into()),
            awaiting_confirmation: true,
            ..Default::default()
        };
        threads.set_side_state(id, &draft).await.unwrap();
        assert_eq!(threads.side_state::<CancelDraft>(id).await.unwrap(), Some(draft));
        assert!(threads.side_state::<BookingDraft>(id).await.unwrap().is_none());

        threads.clear_side_state(id, SideSlot::CancelData).await.unwrap();
        assert!(threads.side_state::<CancelDraft>(id).await.unwrap().is_none());
    }

    #[test]
    fn test_booking_draft_is_lenient() {
        let d: BookingDraft = serde_json::from_str(
            r#"{"district_from":"Dhaka","district_to":"null","pickup_point":"","seats":"2","fare":550}"#,
        )
        .unwrap();
        assert_eq!(d.district_from.as_deref(), Some("Dhaka"));
        assert_eq!(d.district_to, None);
        assert_eq!(d.pickup_point, None);
        assert_eq!(d.seats, Some(2));
        assert_eq!(d.fare, Some(550.0));

        let d: BookingDraft = serde_json::from_str(r#"{"seats":1.5}"#).unwrap();
        assert_eq!(d.seats, None);
    }

    #[test]
    fn test_format_history() {
        assert_eq!(format_history(&[]), "No prior conversation.");
        let text = format_history(&[Turn::new("hi", "hello")]);
        assert_eq!(text, "User: hi\nBot: hello");
    }
}
