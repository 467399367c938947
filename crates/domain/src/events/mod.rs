//! 出站事件定义
//!
//! 协调器在持久化完成之后向连接推送的强类型事件。

pub mod chat_event;

pub use chat_event::*;
