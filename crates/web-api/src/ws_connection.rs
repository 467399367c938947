use application::{ApplicationResult, SendMessageRequest};
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ConnectionId, SessionUser};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::error::ApiError;
use crate::protocol::{ClientCommand, ServerReply};
use crate::state::AppState;

/// WebSocket 连接
///
/// 一个已认证会话对应的单条实时连接。连接建立即登记在线，
/// 套接字关闭时注销；同一连接上的命令按到达顺序逐条处理。
pub struct ChatConnection {
    state: AppState,
    session: SessionUser,
    connection_id: ConnectionId,
}

impl ChatConnection {
    pub fn new(state: AppState, session: SessionUser) -> Self {
        Self {
            state,
            session,
            connection_id: ConnectionId::generate(),
        }
    }

    /// 运行 WebSocket 连接的主循环
    ///
    /// 发送任务统一负责写套接字：协调器投递的广播事件和本连接的回复都经由它写出。
    /// 接收任务解析客户端命令并调用协调器。任意一方结束即视为断开。
    pub async fn run(self, socket: WebSocket) {
        let user_id = self.session.user_id;
        let connection_id = self.connection_id;

        // 先挂接事件通道再登记，避免丢失登记之后立即产生的事件
        let mut events = self.state.hub.register(connection_id);
        self.state.coordinator.connect(&self.session, connection_id);

        let (mut sender, mut incoming) = socket.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        let snapshot = ServerReply::PresenceSnapshot {
            users: self.state.coordinator.online_users(),
        };
        if cmd_tx.send(WsCommand::Reply(snapshot)).await.is_err() {
            tracing::warn!(%user_id, %connection_id, "failed to queue presence snapshot");
        }

        // 发送任务：统一处理所有对 WebSocket sender 的写操作
        let mut send_task = tokio::spawn(async move {
            loop {
                // 回复优先，保证在线快照是连接上的第一帧
                let frame = tokio::select! {
                    biased;
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        WsCommand::Reply(reply) => serde_json::to_string(&reply)
                            .map(|json| WsMessage::Text(json.into())),
                        WsCommand::Pong(data) => Ok(WsMessage::Pong(data)),
                    },
                    Some(event) = events.recv() => serde_json::to_string(event.as_ref())
                        .map(|json| WsMessage::Text(json.into())),
                    else => break,
                };

                let frame = match frame {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to serialize websocket payload");
                        continue;
                    }
                };
                if sender.send(frame).await.is_err() {
                    tracing::debug!(%connection_id, "socket write failed");
                    break;
                }
            }
        });

        // 接收任务：处理来自WebSocket客户端的消息
        let mut recv_task = {
            let state = self.state.clone();
            let session = self.session.clone();
            tokio::spawn(async move {
                while let Some(Ok(message)) = incoming.next().await {
                    if handle_incoming(&state, &session, message, &cmd_tx)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            })
        };

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        self.state.hub.unregister(connection_id);
        self.state.coordinator.disconnect(user_id, connection_id);
        tracing::info!(%user_id, %connection_id, "websocket closed");
    }
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    Reply(ServerReply),
    Pong(Bytes),
}

/// 处理来自客户端的消息，返回 `Err` 表示连接应当结束
async fn handle_incoming(
    state: &AppState,
    session: &SessionUser,
    message: WsMessage,
    cmd_tx: &mpsc::Sender<WsCommand>,
) -> Result<(), ()> {
    let reply = match message {
        WsMessage::Close(_) => {
            tracing::debug!(user_id = %session.user_id, "client closed websocket");
            return Err(());
        }
        WsMessage::Ping(data) => {
            return cmd_tx.send(WsCommand::Pong(data)).await.map_err(|_| ());
        }
        WsMessage::Pong(_) => return Ok(()),
        WsMessage::Text(text) => match serde_json::from_str::<ClientCommand>(text.as_str()) {
            Ok(command) => dispatch(state, session, command).await,
            Err(err) => {
                tracing::debug!(user_id = %session.user_id, error = %err, "unparseable frame");
                Some(error_reply(ApiError::bad_request(format!(
                    "unrecognized command: {err}"
                ))))
            }
        },
        WsMessage::Binary(_) => Some(error_reply(ApiError::bad_request(
            "binary frames are not supported",
        ))),
    };

    match reply {
        Some(reply) => cmd_tx.send(WsCommand::Reply(reply)).await.map_err(|_| ()),
        None => Ok(()),
    }
}

/// 执行命令。校验与授权类拒绝在协议层静默，只有存储或基础设施故障才回复错误帧。
async fn dispatch(
    state: &AppState,
    session: &SessionUser,
    command: ClientCommand,
) -> Option<ServerReply> {
    let name = command.name();
    match execute(state, session, command).await {
        Ok(reply) => reply,
        Err(err) if err.is_rejection() => {
            tracing::debug!(
                user_id = %session.user_id,
                command = name,
                reason = %err,
                "command rejected"
            );
            None
        }
        Err(err) => {
            tracing::warn!(user_id = %session.user_id, command = name, error = %err, "command failed");
            Some(error_reply(ApiError::from(err)))
        }
    }
}

fn error_reply(error: ApiError) -> ServerReply {
    ServerReply::error(error.code(), error.message())
}

async fn execute(
    state: &AppState,
    session: &SessionUser,
    command: ClientCommand,
) -> ApplicationResult<Option<ServerReply>> {
    let coordinator = &state.coordinator;
    match command {
        ClientCommand::SendMessage {
            text,
            recipient_ids,
            attachment_url,
        } => {
            coordinator
                .send_message(
                    session,
                    SendMessageRequest {
                        text,
                        recipient_ids,
                        attachment_url,
                    },
                )
                .await?;
            Ok(None)
        }
        ClientCommand::EditMessage { message_id, text } => {
            coordinator.edit_message(session, message_id, text).await?;
            Ok(None)
        }
        ClientCommand::DeleteMessage { message_id } => {
            coordinator.delete_message(session, message_id).await?;
            Ok(None)
        }
        ClientCommand::AddReaction { message_id, emoji } => {
            coordinator.add_reaction(session, message_id, emoji).await?;
            Ok(None)
        }
        ClientCommand::RemoveReaction { message_id, emoji } => {
            coordinator.remove_reaction(session, message_id, emoji).await?;
            Ok(None)
        }
        ClientCommand::History { before, limit } => {
            let messages = coordinator.history(session, before, limit).await?;
            Ok(Some(ServerReply::History { messages }))
        }
        ClientCommand::Presence => Ok(Some(ServerReply::PresenceSnapshot {
            users: coordinator.online_users(),
        })),
        ClientCommand::Contacts => {
            let contacts = coordinator.contacts(session).await?;
            Ok(Some(ServerReply::Contacts { contacts }))
        }
        ClientCommand::Ping => Ok(Some(ServerReply::Pong)),
    }
}
