//! WebSocket 文本帧协议
//!
//! 客户端命令与服务端回复都是以 `type` 字段区分的 JSON 对象（kebab-case）。
//! 广播事件直接使用领域层的 `ChatEvent` 序列化结果。

use domain::{Contact, Message, MessageId, OnlineUser, UserId};
use serde::{Deserialize, Serialize};

/// 客户端命令。发送者身份总是取自会话，不接受载荷中的声明。
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientCommand {
    SendMessage {
        /// 仅附件消息可以省略正文
        #[serde(default)]
        text: String,
        recipient_ids: Vec<UserId>,
        #[serde(default)]
        attachment_url: Option<String>,
    },
    EditMessage {
        message_id: MessageId,
        text: String,
    },
    DeleteMessage {
        message_id: MessageId,
    },
    AddReaction {
        message_id: MessageId,
        emoji: String,
    },
    RemoveReaction {
        message_id: MessageId,
        emoji: String,
    },
    History {
        #[serde(default)]
        before: Option<MessageId>,
        #[serde(default)]
        limit: Option<u32>,
    },
    Presence,
    Contacts,
    Ping,
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::SendMessage { .. } => "send-message",
            ClientCommand::EditMessage { .. } => "edit-message",
            ClientCommand::DeleteMessage { .. } => "delete-message",
            ClientCommand::AddReaction { .. } => "add-reaction",
            ClientCommand::RemoveReaction { .. } => "remove-reaction",
            ClientCommand::History { .. } => "history",
            ClientCommand::Presence => "presence",
            ClientCommand::Contacts => "contacts",
            ClientCommand::Ping => "ping",
        }
    }
}

/// 只发给发起请求的连接的回复
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerReply {
    PresenceSnapshot { users: Vec<OnlineUser> },
    History { messages: Vec<Message> },
    Contacts { contacts: Vec<Contact> },
    Pong,
    /// 仅用于存储/基础设施故障与无法解析的帧
    Error { code: String, message: String },
}

impl ServerReply {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerReply::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}
