//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例协调：连接登记与在线状态推导、
//! 消息命令的授权与持久化、以及向出站通道的事件扇出。

pub mod clock;
pub mod delivery;
pub mod error;
pub mod memory;
pub mod registry;
pub mod services;
pub mod visibility;

pub use clock::{Clock, ManualClock, SystemClock};
pub use delivery::{
    ConnectionHub, DeliveryError, EventReceiver, EventSink, DEFAULT_CONNECTION_BUFFER,
};
pub use error::{ApplicationError, ApplicationResult};
pub use memory::{MemoryMessageRepository, StaticRoleDirectory};
pub use registry::{ConnectionRegistry, PresenceGate};
pub use services::{
    ChatCoordinator, ChatCoordinatorDependencies, ChatSettings, SendMessageRequest,
};
pub use visibility::VisibilityResolver;
