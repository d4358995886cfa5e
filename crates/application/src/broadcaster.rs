use std::fmt;

use async_trait::async_trait;
use domain::ConversationId;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::events::ServerEvent;

/// 单个实时连接的标识，用于“排除发送者”类的广播
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 发往一个或多个房间的事件。订阅了其中任一房间的连接收到一次。
#[derive(Debug, Clone)]
pub struct RoomBroadcast {
    pub rooms: Vec<ConversationId>,
    pub exclude: Option<ConnectionId>,
    pub event: ServerEvent,
}

impl RoomBroadcast {
    pub fn to_room(room: ConversationId, event: ServerEvent) -> Self {
        Self {
            rooms: vec![room],
            exclude: None,
            event,
        }
    }

    pub fn excluding(mut self, connection: ConnectionId) -> Self {
        self.exclude = Some(connection);
        self
    }

    pub fn is_addressed_to(
        &self,
        connection: ConnectionId,
        joined: impl Fn(&ConversationId) -> bool,
    ) -> bool {
        self.exclude != Some(connection) && self.rooms.iter().any(joined)
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[async_trait]
pub trait RoomBroadcaster: Send + Sync {
    async fn publish(&self, payload: RoomBroadcast) -> Result<(), BroadcastError>;

    /// 订阅全部广播，由连接自己按房间成员关系过滤
    fn subscribe(&self) -> broadcast::Receiver<RoomBroadcast>;
}
