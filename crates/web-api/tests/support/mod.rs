#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{ChatSettings, MemoryMessageRepository, StaticRoleDirectory};
use async_trait::async_trait;
use domain::{
    Emoji, HistoryQuery, Message, MessageId, MessageRepository, MessageText, NewMessage,
    Reaction, RepositoryError, RepositoryResult, RoleName, SessionUser, Timestamp, UserId,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::timeout,
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;
use web_api::{router, AppState, JwtConfig};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_TIMEOUT: Duration = Duration::from_secs(3);

pub fn jwt_config() -> JwtConfig {
    JwtConfig {
        secret: "integration-test-secret-with-32-characters".to_string(),
        expiration_hours: 1,
    }
}

/// 使用内存存储的测试状态
pub fn memory_state() -> (AppState, Arc<StaticRoleDirectory>) {
    memory_state_with(Arc::new(MemoryMessageRepository::new()))
}

pub fn memory_state_with(
    repository: Arc<dyn MessageRepository>,
) -> (AppState, Arc<StaticRoleDirectory>) {
    let directory = Arc::new(StaticRoleDirectory::new());
    let state = AppState::assemble(
        repository,
        directory.clone(),
        ChatSettings {
            visibility_cache_ttl: Duration::ZERO,
            ..ChatSettings::default()
        },
        jwt_config(),
    );
    (state, directory)
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub directory: Arc<StaticRoleDirectory>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let (state, directory) = memory_state();
        Self::start_with(state, directory).await
    }

    pub async fn start_with(state: AppState, directory: Arc<StaticRoleDirectory>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            state,
            directory,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/api/v1/ws?token={}", self.addr, token)
    }

    /// 创建带角色的用户并签发令牌
    pub async fn user(&self, name: &str, role: &str) -> (SessionUser, String) {
        let session = SessionUser::new(UserId::from(Uuid::new_v4()), name);
        self.directory
            .assign(session.user_id, RoleName::new(role))
            .await;
        let token = self
            .state
            .jwt_service
            .generate_token(&session)
            .expect("token");
        (session, token)
    }

    /// 建立连接并等待在线快照，快照到达即表示连接已登记
    pub async fn connect(&self, token: &str) -> (WsClient, Value) {
        let (mut ws, _) = connect_async(self.ws_url(token)).await.expect("connect");
        let snapshot = next_json(&mut ws).await;
        assert_eq!(snapshot["type"], "presence-snapshot");
        (ws, snapshot)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(WsMessage::Text(value.to_string().into()))
        .await
        .expect("send frame");
}

/// 读取下一个 JSON 文本帧
pub async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let frame = timeout(FRAME_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match frame {
            WsMessage::Text(text) => return serde_json::from_str(text.as_str()).expect("json"),
            WsMessage::Close(_) => panic!("connection closed"),
            _ => continue,
        }
    }
}

/// 用 ping/pong 做栅栏：同一连接上的命令按序处理，
/// 因此 pong 之前没有其他帧就说明先前的命令没有产生任何输出
pub async fn assert_quiet(ws: &mut WsClient) {
    send_json(ws, serde_json::json!({ "type": "ping" })).await;
    let frame = next_json(ws).await;
    assert_eq!(frame["type"], "pong", "unexpected frame {frame}");
}

/// 存储永远失败的消息仓储，用于验证持久化失败时的行为
pub struct FailingMessageRepository;

#[async_trait]
impl MessageRepository for FailingMessageRepository {
    async fn create_message(&self, _message: NewMessage) -> RepositoryResult<Message> {
        Err(RepositoryError::storage("connection refused"))
    }

    async fn find_by_id(&self, _id: MessageId) -> RepositoryResult<Option<Message>> {
        Err(RepositoryError::storage("connection refused"))
    }

    async fn update_text(
        &self,
        _id: MessageId,
        _sender_id: UserId,
        _text: MessageText,
        _edited_at: Timestamp,
    ) -> RepositoryResult<bool> {
        Err(RepositoryError::storage("connection refused"))
    }

    async fn delete_message(&self, _id: MessageId, _sender_id: UserId) -> RepositoryResult<bool> {
        Err(RepositoryError::storage("connection refused"))
    }

    async fn add_reaction(&self, _id: MessageId, _reaction: Reaction) -> RepositoryResult<bool> {
        Err(RepositoryError::storage("connection refused"))
    }

    async fn remove_reaction(
        &self,
        _id: MessageId,
        _user_id: UserId,
        _emoji: Emoji,
    ) -> RepositoryResult<bool> {
        Err(RepositoryError::storage("connection refused"))
    }

    async fn history(
        &self,
        _user_id: UserId,
        _query: HistoryQuery,
    ) -> RepositoryResult<Vec<Message>> {
        Err(RepositoryError::storage("connection refused"))
    }
}
