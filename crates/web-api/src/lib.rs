//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 实时通道承载聊天命令与广播事件，
//! 少量 REST 端点用于在线列表与历史查询。

mod auth;
mod error;
mod protocol;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, JwtService};
pub use config::JwtConfig;
pub use error::{ApiError, ErrorBody};
pub use protocol::{ClientCommand, ServerReply};
pub use routes::router;
pub use state::AppState;
