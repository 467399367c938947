//! 聊天出站事件
//!
//! 每个变体对应一种线上事件，序列化时以 `type` 字段区分（kebab-case）。

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::value_objects::{AttachmentUrl, Emoji, MessageId, MessageText, Timestamp, UserId};

/// 推送给连接的聊天事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChatEvent {
    /// 新消息，发送给发送者自己以及在线的接收者
    MessageReceived {
        sender_id: UserId,
        sender_name: String,
        text: MessageText,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: Timestamp,
        attachment_url: Option<AttachmentUrl>,
        recipient_ids: Vec<UserId>,
        message_id: MessageId,
    },

    MessageEdited {
        message_id: MessageId,
        text: MessageText,
    },

    MessageDeleted { message_id: MessageId },

    ReactionAdded {
        message_id: MessageId,
        user_id: UserId,
        display_name: String,
        emoji: Emoji,
    },

    ReactionRemoved {
        message_id: MessageId,
        user_id: UserId,
        emoji: Emoji,
    },

    /// 用户从离线变为在线（第一条连接）
    PresenceOnline {
        user_id: UserId,
        display_name: String,
    },

    /// 用户最后一条连接断开
    PresenceOffline { user_id: UserId },
}

impl ChatEvent {
    /// 根据已持久化的消息构建“收到消息”事件
    pub fn message_received(message: &Message) -> Self {
        ChatEvent::MessageReceived {
            sender_id: message.sender_id,
            sender_name: message.sender_name.clone(),
            text: message.text.clone(),
            timestamp: message.sent_at,
            attachment_url: message.attachment_url.clone(),
            recipient_ids: message.recipient_ids.to_vec(),
            message_id: message.id,
        }
    }

    /// 事件名称，用于日志
    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::MessageReceived { .. } => "message-received",
            ChatEvent::MessageEdited { .. } => "message-edited",
            ChatEvent::MessageDeleted { .. } => "message-deleted",
            ChatEvent::ReactionAdded { .. } => "reaction-added",
            ChatEvent::ReactionRemoved { .. } => "reaction-removed",
            ChatEvent::PresenceOnline { .. } => "presence-online",
            ChatEvent::PresenceOffline { .. } => "presence-offline",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn events_are_tagged_with_kebab_case_type() {
        let event = ChatEvent::MessageEdited {
            message_id: MessageId::new(7),
            text: MessageText::parse("hi there").expect("text"),
        };

        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "message-edited");
        assert_eq!(json["message_id"], 7);
        assert_eq!(json["text"], "hi there");
        assert_eq!(event.kind(), "message-edited");
    }

    #[test]
    fn presence_offline_carries_only_user_id() {
        let user_id = UserId::from(Uuid::new_v4());
        let json = serde_json::to_value(ChatEvent::PresenceOffline { user_id }).expect("json");

        assert_eq!(json["type"], "presence-offline");
        assert_eq!(json["user_id"], user_id.to_string());
        assert_eq!(json.as_object().map(|o| o.len()), Some(2));
    }
}
