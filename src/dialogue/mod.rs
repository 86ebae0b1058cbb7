//! 对话层：线程状态、意图识别、各意图 handler 与编排器

pub mod handlers;
pub mod intent;
pub mod orchestrator;
pub mod state;

pub use handlers::{HandlerContext, HandlerReply, IntentHandler};
pub use intent::{IntentClassifier, IntentLabel};
pub use orchestrator::{ChatRequest, ChatResponse, Orchestrator, OrchestratorDeps};
pub use state::{
    format_history, BookingDraft, CancelDraft, SlotValue, ThreadManager, ViewPhoneCache,
};
