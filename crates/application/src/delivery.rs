//! 出站事件投递
//!
//! 协调器把事件交给 `EventSink` 后立即返回，从不等待送达确认。
//! `ConnectionHub` 为每条连接维护一个有界通道，传输层从通道读取并写入套接字。
//! 通道写满说明客户端读取停滞，此时丢弃新事件而不是无限堆积。

use std::sync::Arc;

use dashmap::DashMap;
use domain::{ChatEvent, ConnectionId};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

pub type EventReceiver = mpsc::Receiver<Arc<ChatEvent>>;

/// 每条连接默认可积压的事件数
pub const DEFAULT_CONNECTION_BUFFER: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection {0} is not attached")]
    Detached(ConnectionId),
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
    #[error("connection {0} is not keeping up, event dropped")]
    Lagging(ConnectionId),
}

/// 传输层发送抽象。实现必须是非阻塞的。
pub trait EventSink: Send + Sync {
    fn deliver(&self, connection_id: ConnectionId, event: Arc<ChatEvent>)
        -> Result<(), DeliveryError>;
}

/// 按连接 ID 索引的事件通道集合
#[derive(Debug)]
pub struct ConnectionHub {
    senders: DashMap<ConnectionId, mpsc::Sender<Arc<ChatEvent>>>,
    buffer: usize,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::with_buffer(DEFAULT_CONNECTION_BUFFER)
    }
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            senders: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// 为连接创建事件通道，返回接收端
    pub fn register(&self, connection_id: ConnectionId) -> EventReceiver {
        let (sender, receiver) = mpsc::channel(self.buffer);
        if self.senders.insert(connection_id, sender).is_some() {
            tracing::warn!(%connection_id, "connection re-attached, previous channel dropped");
        }
        receiver
    }

    pub fn unregister(&self, connection_id: ConnectionId) {
        self.senders.remove(&connection_id);
    }

    pub fn attached_count(&self) -> usize {
        self.senders.len()
    }
}

impl EventSink for ConnectionHub {
    fn deliver(
        &self,
        connection_id: ConnectionId,
        event: Arc<ChatEvent>,
    ) -> Result<(), DeliveryError> {
        let sender = self
            .senders
            .get(&connection_id)
            .ok_or(DeliveryError::Detached(connection_id))?;
        sender.try_send(event).map_err(|err| match err {
            TrySendError::Full(event) => {
                tracing::warn!(%connection_id, event = event.kind(), "connection buffer full");
                DeliveryError::Lagging(connection_id)
            }
            TrySendError::Closed(_) => DeliveryError::Closed(connection_id),
        })
    }
}
