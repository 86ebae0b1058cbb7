//! 核心层：错误分类与用户可见文案

pub mod error;

pub use error::{BotError, ErrorKind, HandlerError};
