use std::sync::Arc;
use std::time::Duration;

use domain::{ConversationId, UserId};
use tokio::task::JoinHandle;

use crate::{
    broadcaster::{ConnectionId, RoomBroadcast, RoomBroadcaster},
    error::ApplicationError,
    events::ServerEvent,
};

struct PendingStop {
    conversation_id: ConversationId,
    handle: JoinHandle<()>,
}

/// 输入状态通知，每个连接一个实例，同一时刻最多一个防抖定时器
pub struct TypingNotifier {
    user_id: UserId,
    connection_id: ConnectionId,
    broadcaster: Arc<dyn RoomBroadcaster>,
    debounce: Duration,
    pending: Option<PendingStop>,
}

impl TypingNotifier {
    pub fn new(
        user_id: UserId,
        connection_id: ConnectionId,
        broadcaster: Arc<dyn RoomBroadcaster>,
        debounce: Duration,
    ) -> Self {
        Self {
            user_id,
            connection_id,
            broadcaster,
            debounce,
            pending: None,
        }
    }

    /// 立即向房间（不含自己）广播 typing，并重新开始防抖计时
    pub async fn notify_typing(
        &mut self,
        conversation_id: ConversationId,
    ) -> Result<(), ApplicationError> {
        if let Some(previous) = self.pending.take() {
            let switched = previous.conversation_id != conversation_id;
            let still_pending = Self::abort(previous.handle).await;
            if switched && still_pending {
                self.publish_stop(previous.conversation_id).await?;
            }
        }

        self.broadcaster
            .publish(
                RoomBroadcast::to_room(
                    conversation_id,
                    ServerEvent::Typing {
                        user_id: self.user_id,
                        conversation_id,
                    },
                )
                .excluding(self.connection_id),
            )
            .await?;

        let broadcaster = self.broadcaster.clone();
        let stop = self.stop_broadcast(conversation_id);
        let debounce = self.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Err(err) = broadcaster.publish(stop).await {
                tracing::warn!(error = %err, "发送 stopTyping 失败");
            }
        });
        self.pending = Some(PendingStop {
            conversation_id,
            handle,
        });
        Ok(())
    }

    /// 连接关闭时调用：定时器仍在等待则取消并立即补发一次 stopTyping
    pub async fn cancel(&mut self) -> Result<(), ApplicationError> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        if Self::abort(pending.handle).await {
            self.publish_stop(pending.conversation_id).await?;
        }
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| !pending.handle.is_finished())
    }

    /// 返回定时器是否在触发之前被取消
    async fn abort(handle: JoinHandle<()>) -> bool {
        handle.abort();
        match handle.await {
            Ok(()) => false,
            Err(err) => err.is_cancelled(),
        }
    }

    async fn publish_stop(&self, conversation_id: ConversationId) -> Result<(), ApplicationError> {
        self.broadcaster
            .publish(self.stop_broadcast(conversation_id))
            .await?;
        Ok(())
    }

    fn stop_broadcast(&self, conversation_id: ConversationId) -> RoomBroadcast {
        RoomBroadcast::to_room(
            conversation_id,
            ServerEvent::StopTyping {
                user_id: self.user_id,
                conversation_id,
            },
        )
        .excluding(self.connection_id)
    }
}

impl Drop for TypingNotifier {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.abort();
        }
    }
}
