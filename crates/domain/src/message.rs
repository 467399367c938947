use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{
    AttachmentUrl, Emoji, MessageId, MessageText, RecipientSet, Timestamp, UserId,
};

/// 消息上的一条表情回应，`(user_id, emoji)` 在同一消息内唯一。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: UserId,
    pub emoji: Emoji,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
}

impl Reaction {
    pub fn new(user_id: UserId, emoji: Emoji, created_at: Timestamp) -> Self {
        Self {
            user_id,
            emoji,
            created_at,
        }
    }

    pub fn matches(&self, user_id: UserId, emoji: &Emoji) -> bool {
        self.user_id == user_id && &self.emoji == emoji
    }
}

/// 尚未持久化的消息，ID 由存储层分配。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub sender_name: String,
    pub text: MessageText,
    pub attachment_url: Option<AttachmentUrl>,
    pub recipient_ids: RecipientSet,
    pub sent_at: Timestamp,
}

impl NewMessage {
    pub fn new(
        sender_id: UserId,
        sender_name: impl Into<String>,
        text: MessageText,
        attachment_url: Option<AttachmentUrl>,
        recipient_ids: RecipientSet,
        sent_at: Timestamp,
    ) -> Result<Self, DomainError> {
        if text.is_blank() && attachment_url.is_none() {
            return Err(DomainError::invalid_argument("text", "cannot be empty"));
        }
        Ok(Self {
            sender_id,
            sender_name: sender_name.into(),
            text,
            attachment_url,
            recipient_ids,
            sent_at,
        })
    }

    /// 存储层分配 ID 后转换为完整消息
    pub fn into_message(self, id: MessageId) -> Message {
        Message {
            id,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            text: self.text,
            attachment_url: self.attachment_url,
            recipient_ids: self.recipient_ids,
            sent_at: self.sent_at,
            edited_at: None,
            reactions: Vec::new(),
        }
    }
}

/// 已持久化的消息。
///
/// 接收者集合在创建后不可变，只有正文可以被发送者编辑。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub text: MessageText,
    pub attachment_url: Option<AttachmentUrl>,
    pub recipient_ids: RecipientSet,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: Timestamp,
    #[serde(with = "time::serde::rfc3339::option")]
    pub edited_at: Option<Timestamp>,
    pub reactions: Vec<Reaction>,
}

impl Message {
    pub fn is_sender(&self, user_id: UserId) -> bool {
        self.sender_id == user_id
    }

    /// 读者是发送者或接收者之一时可见
    pub fn is_visible_to(&self, reader: UserId) -> bool {
        self.is_sender(reader) || self.recipient_ids.contains(&reader)
    }

    /// 参与者：发送者加全部接收者
    pub fn participants(&self) -> BTreeSet<UserId> {
        let mut participants: BTreeSet<UserId> = self.recipient_ids.iter().copied().collect();
        participants.insert(self.sender_id);
        participants
    }

    pub fn has_reaction(&self, user_id: UserId, emoji: &Emoji) -> bool {
        self.reactions.iter().any(|r| r.matches(user_id, emoji))
    }

    /// 校验编辑请求：仅发送者可编辑，无附件的消息不能被改成空白
    pub fn check_edit(&self, editor_id: UserId, text: &MessageText) -> Result<(), DomainError> {
        if !self.is_sender(editor_id) {
            return Err(DomainError::NotMessageSender);
        }
        if text.is_blank() && self.attachment_url.is_none() {
            return Err(DomainError::invalid_argument("text", "cannot be empty"));
        }
        Ok(())
    }

    pub fn check_delete(&self, requester_id: UserId) -> Result<(), DomainError> {
        if !self.is_sender(requester_id) {
            return Err(DomainError::NotMessageSender);
        }
        Ok(())
    }
}

/// 历史消息分页参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// 只返回 ID 小于该值的消息
    pub before: Option<MessageId>,
    pub limit: u32,
}

impl HistoryQuery {
    pub fn latest(limit: u32) -> Self {
        Self {
            before: None,
            limit,
        }
    }
}
