//! 实时在线状态与消息分发核心的领域模型
//!
//! 包含标识与值对象、消息实体、出站事件、错误类型，以及外部协作者
//! （消息存储、角色目录）的接口定义。

pub mod errors;
pub mod events;
pub mod message;
pub mod repository;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use events::*;
pub use message::*;
pub use repository::*;
pub use user::*;
pub use value_objects::*;
