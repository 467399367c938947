//! 聊天协调器
//!
//! 接收发送/编辑/删除/表情回应命令，完成授权检查与持久化之后，
//! 通过连接登记表计算扇出目标并投递出站事件。
//!
//! 所有变更命令都严格遵循“先持久化、后广播”：存储调用成功返回之前不会投递任何事件，
//! 存储失败时命令中止且不广播。投递失败只记录日志，不重试也不回滚。

use std::sync::Arc;
use std::time::Duration;

use domain::{
    AttachmentUrl, ChatEvent, ConnectionId, Contact, DomainError, Emoji, HistoryQuery, Message,
    MessageId, MessageRepository, MessageText, NewMessage, OnlineUser, Reaction, RecipientSet,
    RoleDirectory, SessionUser, UserId,
};

use crate::{
    clock::Clock,
    delivery::{EventSink, DEFAULT_CONNECTION_BUFFER},
    error::{ApplicationError, ApplicationResult},
    registry::{ConnectionRegistry, PresenceGate},
    visibility::VisibilityResolver,
};

/// 协调器运行参数
#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// 未指定时的历史分页大小
    pub history_page_limit: u32,
    pub history_max_limit: u32,
    /// 角色可见性缓存时长，0 表示不缓存
    pub visibility_cache_ttl: Duration,
    /// 每条连接可积压的出站事件数
    pub connection_buffer: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            history_page_limit: 50,
            history_max_limit: 200,
            visibility_cache_ttl: Duration::from_secs(30),
            connection_buffer: DEFAULT_CONNECTION_BUFFER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub text: String,
    pub recipient_ids: Vec<UserId>,
    pub attachment_url: Option<String>,
}

pub struct ChatCoordinatorDependencies {
    pub message_repository: Arc<dyn MessageRepository>,
    pub role_directory: Arc<dyn RoleDirectory>,
    pub registry: Arc<ConnectionRegistry>,
    pub sink: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
    pub settings: ChatSettings,
}

pub struct ChatCoordinator {
    message_repository: Arc<dyn MessageRepository>,
    registry: Arc<ConnectionRegistry>,
    presence_gate: PresenceGate,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    visibility: VisibilityResolver,
    settings: ChatSettings,
}

impl ChatCoordinator {
    pub fn new(deps: ChatCoordinatorDependencies) -> Self {
        let visibility =
            VisibilityResolver::new(deps.role_directory, deps.settings.visibility_cache_ttl);
        Self {
            message_repository: deps.message_repository,
            registry: deps.registry,
            presence_gate: PresenceGate::new(),
            sink: deps.sink,
            clock: deps.clock,
            visibility,
            settings: deps.settings,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn visibility(&self) -> &VisibilityResolver {
        &self.visibility
    }

    /// 会话建立。用户从离线变为在线时，向其他在线用户广播上线事件。
    pub fn connect(&self, session: &SessionUser, connection_id: ConnectionId) -> bool {
        let _gate = self.presence_gate.lock(session.user_id);
        let came_online =
            self.registry
                .add_connection(session.user_id, connection_id, &session.display_name);

        tracing::info!(
            user_id = %session.user_id,
            connection_id = %connection_id,
            came_online,
            "connection registered"
        );

        if came_online {
            let others = self.other_online_users(session.user_id);
            self.fan_out(
                others,
                ChatEvent::PresenceOnline {
                    user_id: session.user_id,
                    display_name: session.display_name.clone(),
                },
            );
        }
        came_online
    }

    /// 会话结束。最后一条连接断开时广播离线事件；重复断开不会再次广播。
    pub fn disconnect(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let _gate = self.presence_gate.lock(user_id);
        let went_offline = self.registry.remove_connection(user_id, connection_id);

        tracing::info!(
            user_id = %user_id,
            connection_id = %connection_id,
            went_offline,
            "connection removed"
        );

        if went_offline {
            let others = self.other_online_users(user_id);
            self.fan_out(others, ChatEvent::PresenceOffline { user_id });
        }
        went_offline
    }

    pub async fn send_message(
        &self,
        session: &SessionUser,
        request: SendMessageRequest,
    ) -> ApplicationResult<Message> {
        let recipients = RecipientSet::parse(request.recipient_ids)?;
        let text = MessageText::parse(request.text)?;
        let attachment_url = request
            .attachment_url
            .map(AttachmentUrl::parse)
            .transpose()?;

        // 角色检查只在发送时进行，历史查询不会按角色回溯过滤
        if let Some(unreachable) = self
            .visibility
            .first_unreachable(session.user_id, recipients.iter().copied())
            .await?
        {
            return Err(DomainError::RecipientNotReachable(unreachable).into());
        }

        let new_message = NewMessage::new(
            session.user_id,
            session.display_name.clone(),
            text,
            attachment_url,
            recipients,
            self.clock.now(),
        )?;

        let message = self
            .message_repository
            .create_message(new_message)
            .await
            .map_err(|err| {
                tracing::error!(sender_id = %session.user_id, error = %err, "failed to persist message");
                ApplicationError::from(err)
            })?;

        let delivered = self.fan_out(
            message.participants(),
            ChatEvent::message_received(&message),
        );

        tracing::info!(
            message_id = %message.id,
            sender_id = %message.sender_id,
            recipients = message.recipient_ids.len(),
            delivered,
            "message sent"
        );

        Ok(message)
    }

    pub async fn edit_message(
        &self,
        session: &SessionUser,
        message_id: MessageId,
        text: String,
    ) -> ApplicationResult<()> {
        let text = MessageText::parse(text)?;
        let message = self.load_message(message_id).await?;
        message.check_edit(session.user_id, &text)?;

        let updated = self
            .message_repository
            .update_text(message_id, session.user_id, text.clone(), self.clock.now())
            .await
            .map_err(|err| {
                tracing::error!(%message_id, error = %err, "failed to persist edit");
                ApplicationError::from(err)
            })?;
        if !updated {
            // 与并发删除竞争失败
            return Err(DomainError::MessageNotFound.into());
        }

        let delivered = self.fan_out(
            message.participants(),
            ChatEvent::MessageEdited { message_id, text },
        );
        tracing::info!(%message_id, editor_id = %session.user_id, delivered, "message edited");
        Ok(())
    }

    pub async fn delete_message(
        &self,
        session: &SessionUser,
        message_id: MessageId,
    ) -> ApplicationResult<()> {
        let message = self.load_message(message_id).await?;
        message.check_delete(session.user_id)?;

        let deleted = self
            .message_repository
            .delete_message(message_id, session.user_id)
            .await
            .map_err(|err| {
                tracing::error!(%message_id, error = %err, "failed to delete message");
                ApplicationError::from(err)
            })?;
        if !deleted {
            return Err(DomainError::MessageNotFound.into());
        }

        let delivered = self.fan_out(
            message.participants(),
            ChatEvent::MessageDeleted { message_id },
        );
        tracing::info!(%message_id, requester_id = %session.user_id, delivered, "message deleted");
        Ok(())
    }

    pub async fn add_reaction(
        &self,
        session: &SessionUser,
        message_id: MessageId,
        emoji: String,
    ) -> ApplicationResult<()> {
        let emoji = Emoji::parse(emoji)?;
        let message = self.load_message(message_id).await?;
        // 非参与者不能得知消息是否存在
        if !message.is_visible_to(session.user_id) {
            return Err(DomainError::MessageNotFound.into());
        }
        if message.has_reaction(session.user_id, &emoji) {
            return Err(DomainError::ReactionAlreadyExists.into());
        }

        let reaction = Reaction::new(session.user_id, emoji.clone(), self.clock.now());
        let inserted = self
            .message_repository
            .add_reaction(message_id, reaction)
            .await
            .map_err(|err| {
                tracing::error!(%message_id, error = %err, "failed to persist reaction");
                ApplicationError::from(err)
            })?;
        if !inserted {
            return Err(DomainError::ReactionAlreadyExists.into());
        }

        let delivered = self.fan_out(
            message.participants(),
            ChatEvent::ReactionAdded {
                message_id,
                user_id: session.user_id,
                display_name: session.display_name.clone(),
                emoji,
            },
        );
        tracing::debug!(%message_id, user_id = %session.user_id, delivered, "reaction added");
        Ok(())
    }

    pub async fn remove_reaction(
        &self,
        session: &SessionUser,
        message_id: MessageId,
        emoji: String,
    ) -> ApplicationResult<()> {
        let emoji = Emoji::parse(emoji)?;
        let message = self.load_message(message_id).await?;

        let removed = self
            .message_repository
            .remove_reaction(message_id, session.user_id, emoji.clone())
            .await
            .map_err(|err| {
                tracing::error!(%message_id, error = %err, "failed to remove reaction");
                ApplicationError::from(err)
            })?;
        if !removed {
            return Err(DomainError::ReactionNotFound.into());
        }

        let delivered = self.fan_out(
            message.participants(),
            ChatEvent::ReactionRemoved {
                message_id,
                user_id: session.user_id,
                emoji,
            },
        );
        tracing::debug!(%message_id, user_id = %session.user_id, delivered, "reaction removed");
        Ok(())
    }

    /// 用户作为发送者或接收者的消息
    pub async fn history(
        &self,
        session: &SessionUser,
        before: Option<MessageId>,
        limit: Option<u32>,
    ) -> ApplicationResult<Vec<Message>> {
        let limit = limit
            .unwrap_or(self.settings.history_page_limit)
            .clamp(1, self.settings.history_max_limit);
        let messages = self
            .message_repository
            .history(session.user_id, HistoryQuery { before, limit })
            .await?;
        Ok(messages)
    }

    /// 在线用户快照，按显示名称排序
    pub fn online_users(&self) -> Vec<OnlineUser> {
        let mut users: Vec<OnlineUser> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|(user_id, display_name)| OnlineUser {
                user_id,
                display_name,
            })
            .collect();
        users.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        users
    }

    /// 可以互发消息的用户，在线者在前
    pub async fn contacts(&self, session: &SessionUser) -> ApplicationResult<Vec<Contact>> {
        let visible = self.visibility.visible_users(session.user_id).await?;
        let mut contacts: Vec<Contact> = visible
            .iter()
            .filter(|user_id| **user_id != session.user_id)
            .map(|user_id| {
                let display_name = self.registry.display_name(*user_id);
                Contact {
                    user_id: *user_id,
                    online: display_name.is_some(),
                    display_name,
                }
            })
            .collect();
        contacts.sort_by(|a, b| {
            b.online
                .cmp(&a.online)
                .then_with(|| a.display_name.cmp(&b.display_name))
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(contacts)
    }

    async fn load_message(&self, message_id: MessageId) -> ApplicationResult<Message> {
        self.message_repository
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| DomainError::MessageNotFound.into())
    }

    fn other_online_users(&self, user_id: UserId) -> Vec<UserId> {
        self.registry
            .online_user_ids()
            .into_iter()
            .filter(|id| *id != user_id)
            .collect()
    }

    /// 把事件投递给给定用户当前的全部连接，返回成功投递的连接数
    fn fan_out(&self, users: impl IntoIterator<Item = UserId>, event: ChatEvent) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        for user_id in users {
            for connection_id in self.registry.connections_of(user_id) {
                match self.sink.deliver(connection_id, event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(err) => tracing::debug!(
                        %user_id,
                        %connection_id,
                        event = event.kind(),
                        error = %err,
                        "event dropped for dead connection"
                    ),
                }
            }
        }
        delivered
    }
}
