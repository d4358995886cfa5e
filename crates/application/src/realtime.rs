//! 实时连接 actor
//!
//! 每个连接一个任务：通过 mpsc 接收客户端命令，从广播通道接收房间事件，
//! 两者在同一个 `select!` 循环里串行处理。连接结束时按固定顺序清理：
//! 取消输入防抖定时器、置为离线、离开全部房间。

use std::sync::Arc;
use std::time::Duration;

use domain::UserId;
use tokio::sync::{broadcast, mpsc};

use crate::{
    broadcaster::{ConnectionId, RoomBroadcast, RoomBroadcaster},
    error::ApplicationError,
    events::{ClientCommand, ServerEvent},
    presence::PresenceTracker,
    services::{ConversationRouter, MessageCoordinator, RoomMembership, TypingNotifier},
};

/// 所有连接共享的服务
pub struct RealtimeServices {
    pub router: Arc<ConversationRouter>,
    pub coordinator: Arc<MessageCoordinator>,
    pub presence: Arc<PresenceTracker>,
    pub broadcaster: Arc<dyn RoomBroadcaster>,
    pub typing_debounce: Duration,
}

impl RealtimeServices {
    /// 在线状态续期间隔，取 TTL 的一半
    fn heartbeat_interval(&self) -> Duration {
        (self.presence.ttl() / 2).max(Duration::from_millis(10))
    }

    /// 建立连接：解析房间、订阅广播、加入房间、标记在线并通知房间成员
    pub async fn open(self: &Arc<Self>, user_id: UserId) -> Result<ConnectionActor, ApplicationError> {
        let connection_id = ConnectionId::generate();
        let rooms = self.router.resolve_rooms(user_id).await?;
        // 先订阅再加入，避免漏掉两步之间的事件
        let subscription = self.broadcaster.subscribe();
        let mut membership = RoomMembership::new();
        self.router.join_rooms(&mut membership, &rooms);

        if let Err(err) = self.presence.mark_online(user_id).await {
            tracing::warn!(user_id = %user_id, error = %err, "标记在线失败");
        }

        let actor = ConnectionActor {
            services: self.clone(),
            user_id,
            connection_id,
            typing: TypingNotifier::new(
                user_id,
                connection_id,
                self.broadcaster.clone(),
                self.typing_debounce,
            ),
            membership,
            subscription,
        };
        actor
            .announce(ServerEvent::UserOnline { user_id })
            .await;

        tracing::info!(
            user_id = %user_id,
            connection_id = %connection_id,
            rooms = rooms.len(),
            "实时连接已建立"
        );
        Ok(actor)
    }
}

pub struct ConnectionActor {
    services: Arc<RealtimeServices>,
    user_id: UserId,
    connection_id: ConnectionId,
    membership: RoomMembership,
    typing: TypingNotifier,
    subscription: broadcast::Receiver<RoomBroadcast>,
}

impl ConnectionActor {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn membership(&self) -> &RoomMembership {
        &self.membership
    }

    /// 运行直到客户端断开（`inbound` 关闭）或出站通道关闭，然后执行清理
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<ClientCommand>,
        outbound: mpsc::Sender<ServerEvent>,
    ) {
        let mut heartbeat = tokio::time::interval(self.services.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                command = inbound.recv() => {
                    let Some(command) = command else { break };
                    self.touch_presence().await;
                    if let Some(reply) = self.handle_command(command).await {
                        if outbound.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
                received = self.subscription.recv() => {
                    match received {
                        Ok(broadcast) => {
                            if self.should_deliver(&broadcast)
                                && outbound.send(broadcast.event).await.is_err()
                            {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                connection_id = %self.connection_id,
                                skipped,
                                "连接消费过慢，丢弃部分广播"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = heartbeat.tick() => {
                    self.touch_presence().await;
                }
            }
        }

        self.teardown().await;
    }

    /// 处理单条客户端命令，需要回执时返回 ack
    pub async fn handle_command(&mut self, command: ClientCommand) -> Option<ServerEvent> {
        match command {
            ClientCommand::SendMessage {
                content,
                conversation_id,
                request_id,
            } => {
                let result = self
                    .services
                    .coordinator
                    .send(self.user_id, conversation_id, &content)
                    .await;
                Some(match result {
                    Ok(message) => ServerEvent::ack_ok(request_id, message),
                    Err(err) => {
                        if err.is_internal() {
                            tracing::error!(user_id = %self.user_id, error = %err, "发送消息失败");
                        }
                        ServerEvent::ack_err(request_id, err.code(), err.public_message())
                    }
                })
            }
            ClientCommand::MarkAsRead { message_ids } => {
                if let Err(err) = self
                    .services
                    .coordinator
                    .mark_read(self.user_id, &message_ids)
                    .await
                {
                    tracing::warn!(user_id = %self.user_id, error = %err, "标记已读失败");
                }
                None
            }
            ClientCommand::Typing { conversation_id } => {
                if !self.membership.contains(&conversation_id) {
                    tracing::debug!(
                        user_id = %self.user_id,
                        conversation_id = %conversation_id,
                        "忽略未加入房间的输入通知"
                    );
                    return None;
                }
                if let Err(err) = self.typing.notify_typing(conversation_id).await {
                    tracing::warn!(user_id = %self.user_id, error = %err, "输入通知失败");
                }
                None
            }
        }
    }

    fn should_deliver(&self, broadcast: &RoomBroadcast) -> bool {
        broadcast.is_addressed_to(self.connection_id, |room| self.membership.contains(room))
    }

    async fn touch_presence(&self) {
        if let Err(err) = self.services.presence.mark_online(self.user_id).await {
            tracing::warn!(user_id = %self.user_id, error = %err, "在线状态续期失败");
        }
    }

    /// 发给本连接所在全部房间（不含自己）
    async fn announce(&self, event: ServerEvent) {
        if self.membership.is_empty() {
            return;
        }
        let broadcast = RoomBroadcast {
            rooms: self.membership.rooms(),
            exclude: Some(self.connection_id),
            event,
        };
        if let Err(err) = self.services.broadcaster.publish(broadcast).await {
            tracing::warn!(user_id = %self.user_id, error = %err, "广播在线状态失败");
        }
    }

    /// 连接清理：取消防抖定时器、置为离线、离开全部房间
    pub async fn teardown(mut self) {
        if let Err(err) = self.typing.cancel().await {
            tracing::warn!(user_id = %self.user_id, error = %err, "取消输入状态失败");
        }
        if let Err(err) = self.services.presence.mark_offline(self.user_id).await {
            tracing::warn!(user_id = %self.user_id, error = %err, "标记离线失败");
        }
        self.announce(ServerEvent::UserOffline {
            user_id: self.user_id,
        })
        .await;
        let left = self.membership.leave_all();

        tracing::info!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            rooms = left.len(),
            "实时连接已关闭"
        );
    }
}
