//! 异步 SQLite 存储（sqlx）
//!
//! 线程、轮次、暂存槽位、数据集快照、订单各占一张表。时间统一存为 RFC3339（微秒，UTC）文本，
//! 因此按文本排序即按时间排序。需要启用 `async-sqlite` feature。

#![cfg(feature = "async-sqlite")]

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::models::{
    Booking, BookingQuery, BookingStatus, Dataset, PaymentStatus, SideSlot, ThreadRecord, Turn,
};
use super::{ConversationStore, StoreError};

const BOOKING_COLUMNS: &str = "booking_id, user_id, name, phone, district_from, district_to, \
     pickup_point, dropping_point, bus_provider, travel_date, seats, fare, total_amount, \
     payment_status, status, booked_at, cancelled_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {:?}: {}", s, e)))
}

impl SqliteStore {
    /// 打开（或创建）数据库文件并建表
    pub async fn new(db_path: impl AsRef<Path>, acquire_timeout: Duration) -> Result<Self, StoreError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(acquire_timeout)
            .connect(&db_url)
            .await?;

        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS threads (
                thread_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id TEXT NOT NULL,
                user_text TEXT NOT NULL,
                bot_text TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (thread_id) REFERENCES threads(thread_id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS side_states (
                thread_id TEXT NOT NULL,
                slot TEXT NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (thread_id, slot)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS dataset (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS bookings (
                booking_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                phone TEXT NOT NULL,
                district_from TEXT NOT NULL,
                district_to TEXT NOT NULL,
                pickup_point TEXT NOT NULL,
                dropping_point TEXT NOT NULL,
                bus_provider TEXT NOT NULL,
                travel_date TEXT NOT NULL,
                seats INTEGER NOT NULL,
                fare REAL NOT NULL,
                total_amount REAL NOT NULL,
                payment_status TEXT NOT NULL,
                status TEXT NOT NULL,
                booked_at TEXT NOT NULL,
                cancelled_at TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_turns_thread ON turns(thread_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_bookings_phone ON bookings(phone)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn row_to_booking(row: &SqliteRow) -> Result<Booking, StoreError> {
        let status: String = row.try_get("status")?;
        let payment_status: String = row.try_get("payment_status")?;
        let booked_at: String = row.try_get("booked_at")?;
        let cancelled_at: Option<String> = row.try_get("cancelled_at")?;
        let seats: i64 = row.try_get("seats")?;

        Ok(Booking {
            booking_id: row.try_get("booking_id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            phone: row.try_get("phone")?,
            district_from: row.try_get("district_from")?,
            district_to: row.try_get("district_to")?,
            pickup_point: row.try_get("pickup_point")?,
            dropping_point: row.try_get("dropping_point")?,
            bus_provider: row.try_get("bus_provider")?,
            date: row.try_get("travel_date")?,
            seats: u32::try_from(seats)
                .map_err(|_| StoreError::Corrupt(format!("bad seat count {}", seats)))?,
            fare: row.try_get("fare")?,
            total_amount: row.try_get("total_amount")?,
            payment_status: PaymentStatus::parse(&payment_status)
                .ok_or_else(|| StoreError::Corrupt(format!("payment_status {:?}", payment_status)))?,
            status: BookingStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("status {:?}", status)))?,
            booked_at: parse_ts(&booked_at)?,
            cancelled_at: cancelled_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn find_thread(&self, thread_id: &str) -> Result<Option<ThreadRecord>, StoreError> {
        let row = sqlx::query("SELECT thread_id, user_id, created_at FROM threads WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let created_at: String = row.try_get("created_at")?;
            Ok(ThreadRecord {
                thread_id: row.try_get("thread_id")?,
                user_id: row.try_get("user_id")?,
                created_at: parse_ts(&created_at)?,
            })
        })
        .transpose()
    }

    async fn insert_thread(&self, thread: ThreadRecord) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO threads (thread_id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(&thread.thread_id)
            .bind(&thread.user_id)
            .bind(ts(&thread.created_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn push_turn(&self, thread_id: &str, turn: Turn) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO turns (thread_id, user_text, bot_text, created_at)
             SELECT ?, ?, ?, ? WHERE EXISTS (SELECT 1 FROM threads WHERE thread_id = ?)",
        )
        .bind(thread_id)
        .bind(&turn.user)
        .bind(&turn.bot)
        .bind(ts(&turn.timestamp))
        .bind(thread_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn recent_turns(&self, thread_id: &str, limit: usize) -> Result<Vec<Turn>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT user_text, bot_text, created_at FROM (
                SELECT id, user_text, bot_text, created_at FROM turns
                WHERE thread_id = ? ORDER BY id DESC LIMIT ?
             ) ORDER BY id ASC",
        )
        .bind(thread_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let created_at: String = row.try_get("created_at")?;
                Ok(Turn {
                    user: row.try_get("user_text")?,
                    bot: row.try_get("bot_text")?,
                    timestamp: parse_ts(&created_at)?,
                })
            })
            .collect()
    }

    async fn get_side_state(
        &self,
        thread_id: &str,
        slot: SideSlot,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let row = sqlx::query("SELECT payload FROM side_states WHERE thread_id = ? AND slot = ?")
            .bind(thread_id)
            .bind(slot.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let payload: String = row.try_get("payload")?;
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn set_side_state(
        &self,
        thread_id: &str,
        slot: SideSlot,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO side_states (thread_id, slot, payload)
             SELECT ?, ?, ? WHERE EXISTS (SELECT 1 FROM threads WHERE thread_id = ?)",
        )
        .bind(thread_id)
        .bind(slot.as_str())
        .bind(serde_json::to_string(&value)?)
        .bind(thread_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unset_side_state(&self, thread_id: &str, slot: SideSlot) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM side_states WHERE thread_id = ? AND slot = ?")
            .bind(thread_id)
            .bind(slot.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_dataset(&self) -> Result<Option<Dataset>, StoreError> {
        let row = sqlx::query("SELECT payload FROM dataset WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let payload: String = row.try_get("payload")?;
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn replace_dataset(&self, dataset: Dataset) -> Result<(), StoreError> {
        sqlx::query("INSERT OR REPLACE INTO dataset (id, payload, updated_at) VALUES (1, ?, ?)")
            .bind(serde_json::to_string(&dataset)?)
            .bind(ts(&Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_booking(&self, booking: Booking) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO bookings ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            BOOKING_COLUMNS
        );
        sqlx::query(&sql)
            .bind(&booking.booking_id)
            .bind(&booking.user_id)
            .bind(&booking.name)
            .bind(&booking.phone)
            .bind(&booking.district_from)
            .bind(&booking.district_to)
            .bind(&booking.pickup_point)
            .bind(&booking.dropping_point)
            .bind(&booking.bus_provider)
            .bind(&booking.date)
            .bind(i64::from(booking.seats))
            .bind(booking.fare)
            .bind(booking.total_amount)
            .bind(booking.payment_status.as_str())
            .bind(booking.status.as_str())
            .bind(ts(&booking.booked_at))
            .bind(booking.cancelled_at.as_ref().map(ts))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_bookings(&self, query: &BookingQuery) -> Result<Vec<Booking>, StoreError> {
        let mut sql = format!("SELECT {} FROM bookings WHERE 1 = 1", BOOKING_COLUMNS);
        let mut binds: Vec<String> = Vec::new();

        if let Some(phone) = &query.phone {
            sql.push_str(" AND instr(lower(phone), lower(?)) > 0");
            binds.push(phone.trim().to_string());
        }
        if let Some(id) = &query.booking_id {
            sql.push_str(" AND booking_id = ?");
            binds.push(id.clone());
        }
        if let Some(date) = &query.date {
            sql.push_str(" AND travel_date = ?");
            binds.push(date.clone());
        }
        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            binds.push(status.as_str().to_string());
        }
        sql.push_str(" ORDER BY booked_at DESC, rowid DESC");

        let mut q = sqlx::query(&sql);
        for b in &binds {
            q = q.bind(b);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let bookings = rows
            .iter()
            .map(Self::row_to_booking)
            .collect::<Result<Vec<_>, _>>()?;
        // 空号码不匹配任何订单（与内存实现一致）
        Ok(match &query.phone {
            Some(p) if p.trim().is_empty() => Vec::new(),
            _ => bookings,
        })
    }

    async fn cancel_booking(
        &self,
        booking_id: &str,
        cancelled_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE bookings SET status = 'cancelled', cancelled_at = ?
             WHERE booking_id = ? AND status = 'confirmed'",
        )
        .bind(ts(&cancelled_at))
        .bind(booking_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> SqliteStore {
        SqliteStore::new(dir.path().join("test.db"), Duration::from_secs(5))
            .await
            .unwrap()
    }

    fn booking(id: &str, phone: &str) -> Booking {
        Booking {
            booking_id: id.to_string(),
            user_id: "u1".to_string(),
            name: "Karim".to_string(),
            phone: phone.to_string(),
            district_from: "Dhaka".to_string(),
            district_to: "Bogra".to_string(),
            pickup_point: "Kallyanpur".to_string(),
            dropping_point: "Satmatha".to_string(),
            bus_provider: "Shyamoli".to_string(),
            date: "2025-02-01".to_string(),
            seats: 3,
            fare: 550.0,
            total_amount: 1650.0,
            payment_status: PaymentStatus::Pending,
            status: BookingStatus::Confirmed,
            booked_at: Utc::now(),
            cancelled_at: None,
        }
    }

    #[tokio::test]
    async fn test_thread_and_turns() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store.insert_thread(ThreadRecord::new("t1", "u1")).await.unwrap();
        let found = store.find_thread("t1").await.unwrap().unwrap();
        assert_eq!(found.user_id, "u1");
        assert!(store.find_thread("t2").await.unwrap().is_none());

        for i in 0..4 {
            store.push_turn("t1", Turn::new(format!("q{i}"), format!("a{i}"))).await.unwrap();
        }
        assert!(!store.push_turn("t2", Turn::new("x", "y")).await.unwrap());

        let turns = store.recent_turns("t1", 2).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].user, "q2");
        assert_eq!(turns[1].bot, "a3");
    }

    #[tokio::test]
    async fn test_side_state_requires_thread() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store
            .set_side_state("ghost", SideSlot::ViewTicketPhone, serde_json::json!({"phone": "1"}))
            .await
            .unwrap();
        assert!(store.get_side_state("ghost", SideSlot::ViewTicketPhone).await.unwrap().is_none());

        store.insert_thread(ThreadRecord::new("t1", "u1")).await.unwrap();
        store
            .set_side_state("t1", SideSlot::ViewTicketPhone, serde_json::json!({"phone": "1"}))
            .await
            .unwrap();
        store
            .set_side_state("t1", SideSlot::ViewTicketPhone, serde_json::json!({"phone": "2"}))
            .await
            .unwrap();
        let v = store.get_side_state("t1", SideSlot::ViewTicketPhone).await.unwrap().unwrap();
        assert_eq!(v["phone"], "2");

        store.unset_side_state("t1", SideSlot::ViewTicketPhone).await.unwrap();
        assert!(store.get_side_state("t1", SideSlot::ViewTicketPhone).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bookings_roundtrip_and_cancel() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store.insert_booking(booking("b1", "+8801812345678")).await.unwrap();
        let found = store
            .find_bookings(&BookingQuery::by_phone("01812345678"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].total_amount, 1650.0);
        assert_eq!(found[0].status, BookingStatus::Confirmed);

        assert_eq!(store.cancel_booking("b1", Utc::now()).await.unwrap(), 1);
        assert_eq!(store.cancel_booking("b1", Utc::now()).await.unwrap(), 0);

        let b = store
            .find_booking(&BookingQuery::default().with_booking_id("b1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(b.status, BookingStatus::Cancelled);
        assert!(b.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn test_dataset_replace() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        assert!(store.load_dataset().await.unwrap().is_none());

        let ds: Dataset = serde_json::from_str(
            r#"{"districts":[{"name":"Dhaka","dropping_points":[]}],"bus_providers":[]}"#,
        )
        .unwrap();
        store.replace_dataset(ds.clone()).await.unwrap();
        store.replace_dataset(ds.clone()).await.unwrap();
        assert_eq!(store.load_dataset().await.unwrap(), Some(ds));
    }
}
