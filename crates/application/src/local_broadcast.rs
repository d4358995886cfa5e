// 进程内广播器实现
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::broadcaster::{BroadcastError, RoomBroadcast, RoomBroadcaster};

#[derive(Clone)]
pub struct LocalRoomBroadcaster {
    sender: broadcast::Sender<RoomBroadcast>,
}

impl LocalRoomBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for LocalRoomBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl RoomBroadcaster for LocalRoomBroadcaster {
    async fn publish(&self, payload: RoomBroadcast) -> Result<(), BroadcastError> {
        // 没有任何订阅者时 send 返回错误，此时没有人需要收到这条事件
        if self.sender.send(payload).is_err() {
            tracing::debug!("广播时没有活跃的订阅者");
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RoomBroadcast> {
        self.sender.subscribe()
    }
}
