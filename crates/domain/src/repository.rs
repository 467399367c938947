//! 外部协作者接口
//!
//! 消息存储与角色目录都在本核心之外实现，这里只约定调用方式。

use std::collections::HashSet;

use async_trait::async_trait;

use crate::errors::RepositoryError;
use crate::message::{HistoryQuery, Message, NewMessage, Reaction};
use crate::value_objects::{Emoji, MessageId, MessageText, RoleName, Timestamp, UserId};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// 消息持久化接口
///
/// 对同一行的冲突写入（例如并发的编辑与删除）必须串行化：
/// 条件更新/删除以 `(id, sender_id)` 为条件，失败方观察到 `false`。
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 原子地写入消息及其接收者，返回分配了 ID 的消息
    async fn create_message(&self, message: NewMessage) -> RepositoryResult<Message>;

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>>;

    /// 仅当消息存在且发送者匹配时更新正文
    async fn update_text(
        &self,
        id: MessageId,
        sender_id: UserId,
        text: MessageText,
        edited_at: Timestamp,
    ) -> RepositoryResult<bool>;

    /// 硬删除消息（连同表情回应），仅当发送者匹配
    async fn delete_message(&self, id: MessageId, sender_id: UserId) -> RepositoryResult<bool>;

    /// 插入表情回应；消息不存在或该回应已存在时返回 `false`
    async fn add_reaction(&self, id: MessageId, reaction: Reaction) -> RepositoryResult<bool>;

    /// 删除表情回应；不存在时返回 `false`
    async fn remove_reaction(
        &self,
        id: MessageId,
        user_id: UserId,
        emoji: Emoji,
    ) -> RepositoryResult<bool>;

    /// 用户作为发送者或接收者的消息，按 ID 升序返回
    async fn history(&self, user_id: UserId, query: HistoryQuery)
        -> RepositoryResult<Vec<Message>>;
}

/// 角色目录（身份与角色管理由外部系统负责）
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn roles_of(&self, user_id: UserId) -> RepositoryResult<HashSet<RoleName>>;

    /// 拥有任一给定角色的全部用户
    async fn users_sharing_any_role(
        &self,
        roles: HashSet<RoleName>,
    ) -> RepositoryResult<HashSet<UserId>>;
}
