//! 端到端对话流程测试
//!
//! 使用脚本化 LLM 与内存存储驱动 Orchestrator，覆盖退票两阶段确认、订票落库、线路摘要等完整多轮流程。

use std::sync::Arc;

use busbot::config::DialogueSection;
use busbot::core::BotError;
use busbot::dialogue::handlers::cancel_ticket::NO_MATCH;
use busbot::dialogue::{CancelDraft, OrchestratorDeps};
use busbot::llm::{MockEmbedder, ScriptedLlmClient};
use busbot::retrieval::InMemoryRetriever;
use busbot::store::{
    Booking, BookingQuery, BookingStatus, ConversationStore, Dataset, MemoryStore, PaymentStatus,
};
use busbot::{ChatRequest, Orchestrator};

fn dataset() -> Dataset {
    serde_json::from_str(
        r#"{
            "districts": [
                {"name": "Dhaka", "dropping_points": [
                    {"name": "Gabtoli", "price": 0},
                    {"name": "Kallyanpur", "price": 0}
                ]},
                {"name": "Bogra", "dropping_points": [
                    {"name": "Satmatha", "price": 550},
                    {"name": "Thanthania", "price": 600}
                ]}
            ],
            "bus_providers": [
                {"name": "Shyamoli", "coverage_districts": ["Dhaka", "Bogra"]},
                {"name": "Ena", "coverage_districts": ["Dhaka"]}
            ]
        }"#,
    )
    .unwrap()
}

fn booking(id: &str, phone: &str, date: &str) -> Booking {
    Booking {
        booking_id: id.to_string(),
        user_id: "rahim".to_string(),
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

struct Harness {
    orch: Orchestrator,
    llm: Arc<ScriptedLlmClient>,
    store: Arc<MemoryStore>,
}

fn harness() -> Harness {
    let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
    let store = Arc::new(MemoryStore::with_dataset(dataset()));
    let orch = Orchestrator::new(OrchestratorDeps {
        llm: llm.clone(),
        embedder: Arc::new(MockEmbedder::default()),
        retriever: Arc::new(InMemoryRetriever::new()),
        store: store.clone(),
        dialogue: DialogueSection::default(),
        retrieval_top_k: 1,
    });
    Harness { orch, llm, store }
}

fn request(message: &str, thread_id: Option<&str>) -> ChatRequest {
    ChatRequest {
        message: message.to_string(),
        user_id: "rahim".to_string(),
        thread_id: thread_id.map(String::from),
    }
}

fn future_date(days: i64) -> String {
    (chrono::Utc::now() + chrono::Duration::days(days))
        .format("%Y-%m-%d")
        .to_string()
}

#[tokio::test]
async fn test_cancellation_two_phase_flow() {
    let h = harness();
    h.store
        .insert_booking(booking("b-1", "01712345678", "2030-01-10"))
        .await
        .unwrap();
    h.store
        .insert_booking(booking("b-2", "01712345678", "2030-01-20"))
        .await
        .unwrap();

    // 1. 没有手机号
    h.llm.push_response("cancel_ticket");
    h.llm.push_response(r#"{"phone":null,"booking_id":null,"date":null}"#);
    let r1 = h.orch.process(request("I want to cancel my ticket", None)).await.unwrap();
    assert!(r1.response.contains("I need your phone number"));
    let thread_id = r1.thread_id.clone();

    // 2. 只有手机号：列出两张可退订单
    h.llm.push_response("cancel_ticket");
    h.llm.push_response(r#"{"phone":"01712345678","booking_id":null,"date":null}"#);
    let r2 = h.orch.process(request("01712345678", Some(&thread_id))).await.unwrap();
    assert!(r2.response.contains("Option 1"));
    assert!(r2.response.contains("Option 2"));

    // 3. 按日期锁定订单，进入确认阶段
    h.llm.push_response("cancel_ticket");
    h.llm.push_response(r#"{"phone":null,"booking_id":null,"date":"2030-01-20"}"#);
    let r3 = h.orch.process(request("the one on 2030-01-20", Some(&thread_id))).await.unwrap();
    assert!(r3.response.starts_with("⚠️ Confirm Ticket Cancellation"));
    assert!(r3.response.contains("b-2"));

    let draft = h
        .orch
        .threads()
        .side_state::<CancelDraft>(&thread_id)
        .await
        .unwrap()
        .unwrap();
    assert!(draft.awaiting_confirmation);
    assert_eq!(draft.booking_id.as_deref(), Some("b-2"));

    // 4. 确认：不再调用抽取
    h.llm.push_response("cancel_ticket");
    let r4 = h.orch.process(request("yes", Some(&thread_id))).await.unwrap();
    assert!(r4.response.contains("Ticket Cancelled Successfully"));
    assert!(r4.response.contains("b-2"));
    assert_eq!(h.llm.remaining(), 0);

    let cancelled = h
        .store
        .find_booking(&BookingQuery::default().with_booking_id("b-2"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());
    assert!(h
        .orch
        .threads()
        .side_state::<CancelDraft>(&thread_id)
        .await
        .unwrap()
        .is_none());

    // 另一张订单不受影响
    let other = h
        .store
        .find_booking(&BookingQuery::default().with_booking_id("b-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(other.status, BookingStatus::Confirmed);

    // 5. 再次回复 "yes"：草稿已清除，重新抽取后找不到可退订单，记录不再改动
    h.llm.push_response("cancel_ticket");
    h.llm.push_response(r#"{"phone":"01712345678","booking_id":"b-2","date":null}"#);
    let r5 = h.orch.process(request("yes", Some(&thread_id))).await.unwrap();
    assert_eq!(r5.response, NO_MATCH);

    let after = h
        .store
        .find_booking(&BookingQuery::default().with_booking_id("b-2"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, BookingStatus::Cancelled);
    assert_eq!(after.cancelled_at, cancelled.cancelled_at);
    assert_eq!(h.store.cancel_booking("b-2", chrono::Utc::now()).await.unwrap(), 0);

    let turns = h.orch.threads().recent_turns(&thread_id, 20).await.unwrap();
    assert_eq!(turns.len(), 5);
    assert_eq!(turns[3].user, "yes");
}

#[tokio::test]
async fn test_already_cancelled_booking_is_not_offered() {
    let h = harness();
    let mut old = booking("b-1", "01712345678", "2030-01-10");
    old.status = BookingStatus::Cancelled;
    old.cancelled_at = Some(chrono::Utc::now());
    h.store.insert_booking(old.clone()).await.unwrap();

    h.llm.push_response("cancel_ticket");
    h.llm.push_response(r#"{"phone":"017","booking_id":"b-1","date":null}"#);
    let resp = h.orch.process(request("cancel b-1, my phone is 017", None)).await.unwrap();
    assert_eq!(resp.response, NO_MATCH);
    assert!(h
        .orch
        .threads()
        .side_state::<CancelDraft>(&resp.thread_id)
        .await
        .unwrap()
        .is_none());

    // 确认词也不会触发取消：没有等待确认的草稿
    h.llm.push_response("cancel_ticket");
    h.llm.push_response(r#"{"phone":null,"booking_id":null,"date":null}"#);
    let again = h.orch.process(request("yes", Some(&resp.thread_id))).await.unwrap();
    assert!(again.response.contains("I need your phone number"));

    let stored = h
        .store
        .find_booking(&BookingQuery::default().with_booking_id("b-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, old);
}

#[tokio::test]
async fn test_non_confirming_reply_goes_back_to_collecting() {
    let h = harness();
    h.store
        .insert_booking(booking("b-1", "01712345678", "2030-01-10"))
        .await
        .unwrap();

    h.llm.push_response("cancel_ticket");
    h.llm.push_response(r#"{"phone":"01712345678","booking_id":"b-1","date":null}"#);
    let r1 = h.orch.process(request("cancel b-1, phone 01712345678", None)).await.unwrap();
    assert!(r1.response.starts_with("⚠️ Confirm Ticket Cancellation"));

    // "no" 不是确认词：重新抽取，订单保持有效
    h.llm.push_response("cancel_ticket");
    h.llm.push_response(r#"{"phone":null,"booking_id":null,"date":null}"#);
    let r2 = h.orch.process(request("no", Some(&r1.thread_id))).await.unwrap();
    assert!(r2.response.starts_with("⚠️ Confirm Ticket Cancellation"));

    let b = h
        .store
        .find_booking(&BookingQuery::default().with_booking_id("b-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(b.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn test_unroutable_label_is_an_error_without_turn() {
    let h = harness();
    h.llm.push_response("xyz");
    let err = h.orch.process(request("hello", None)).await.unwrap_err();
    assert!(matches!(err, BotError::UnroutableIntent(ref label) if label == "xyz"));
    assert_eq!(h.llm.calls().len(), 1);
}

#[tokio::test]
async fn test_booking_is_persisted_with_total_amount() {
    let h = harness();
    let date = future_date(7);
    h.llm.push_response("book_ticket");
    h.llm.push_response(
        serde_json::json!({
            "action": "complete_booking",
            "updated_booking_data": {
                "district_from": "dhaka",
                "district_to": "Bogra",
                "pickup_point": "Gabtoli",
                "dropping_point": "Satmatha",
                "bus_provider": "Shyamoli",
                "name": "Karim",
                "phone": "01812345678",
                "date": date,
                "seats": 3,
                "fare": 100
            },
            "response_to_user": "Booked!"
        })
        .to_string(),
    );

    let resp = h.orch.process(request("confirm the booking", None)).await.unwrap();
    assert!(resp.response.contains("Booking Confirmed"));
    assert!(resp.response.contains("৳1650"));

    let bookings = h
        .store
        .find_bookings(&BookingQuery::by_phone("01812345678"))
        .await
        .unwrap();
    assert_eq!(bookings.len(), 1);
    let b = &bookings[0];
    assert_eq!(b.district_from, "Dhaka");
    assert_eq!(b.fare, 550.0);
    assert_eq!(b.total_amount, 1650.0);
    assert_eq!(b.user_id, "rahim");
    assert_eq!(b.date, date);
}

#[tokio::test]
async fn test_pickup_outside_departure_district_is_not_booked() {
    let h = harness();
    h.llm.push_response("book_ticket");
    h.llm.push_response(
        serde_json::json!({
            "action": "complete_booking",
            "updated_booking_data": {
                "district_from": "Dhaka",
                "district_to": "Bogra",
                "pickup_point": "Thanthania",
                "dropping_point": "Satmatha",
                "bus_provider": "Shyamoli",
                "name": "Karim",
                "phone": "01812345678",
                "date": future_date(3),
                "seats": 1
            },
            "response_to_user": "Booked!"
        })
        .to_string(),
    );

    let resp = h.orch.process(request("book it", None)).await.unwrap();
    assert!(resp.response.starts_with("I can't complete the booking yet."));
    assert!(h
        .store
        .find_bookings(&BookingQuery::by_phone("01812345678"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_route_summary_uses_only_dataset() {
    let h = harness();
    h.llm.push_response("ask_for_info");
    h.llm
        .push_response(r#"{"from_district":"Dhaka","to_district":"bogra","missing_fields":[]}"#);

    let resp = h.orch.process(request("buses from Dhaka to Bogra?", None)).await.unwrap();
    assert!(resp.response.starts_with("Yes, buses operate from Dhaka to Bogra."));
    assert!(resp.response.contains("Shyamoli"));
    assert!(!resp.response.contains("Ena"));
    assert!(resp.response.contains("Fares typically range from ৳550 to ৳600 per seat."));
    // 识别一次、抽取一次，摘要不再调用模型
    assert_eq!(h.llm.calls().len(), 2);
}

#[tokio::test]
async fn test_unknown_thread_id_starts_new_thread() {
    let h = harness();
    h.llm.push_response("general_chat");
    h.llm.push_response("Hello!");
    let resp = h.orch.process(request("hi", Some("no-such-thread"))).await.unwrap();
    assert_ne!(resp.thread_id, "no-such-thread");

    let thread = h.orch.threads().find_thread(&resp.thread_id).await.unwrap().unwrap();
    assert_eq!(thread.user_id, "rahim");
}

#[cfg(feature = "async-sqlite")]
#[tokio::test]
async fn test_sqlite_backed_conversation_survives_reopen() {
    use std::time::Duration;

    use busbot::store::SqliteStore;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("busbot.db");

    let thread_id = {
        let store = Arc::new(SqliteStore::new(&path, Duration::from_secs(5)).await.unwrap());
        store.replace_dataset(dataset()).await.unwrap();
        let llm = Arc::new(ScriptedLlmClient::new(["general_chat", "Hi Rahim!"]));
        let orch = Orchestrator::new(OrchestratorDeps {
            llm,
            embedder: Arc::new(MockEmbedder::default()),
            retriever: Arc::new(InMemoryRetriever::new()),
            store,
            dialogue: DialogueSection::default(),
            retrieval_top_k: 1,
        });
        orch.process(request("hello", None)).await.unwrap().thread_id
    };

    let store = SqliteStore::new(&path, Duration::from_secs(5)).await.unwrap();
    let turns = store.recent_turns(&thread_id, 10).await.unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].bot, "Hi Rahim!");
    assert!(store.load_dataset().await.unwrap().is_some());
}
