use std::collections::BTreeMap;
use std::sync::Arc;

use domain::{ConversationId, DeliveryStatus, Message, MessageContent, MessageId, UserId};

use crate::{
    broadcaster::{RoomBroadcast, RoomBroadcaster},
    clock::Clock,
    error::ApplicationError,
    events::ServerEvent,
    message_cache::MessageCache,
    repository::MessageRepository,
    services::conversation_router::ConversationRouter,
};

pub struct MessageCoordinatorDependencies {
    pub router: Arc<ConversationRouter>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub cache: Arc<MessageCache>,
    pub broadcaster: Arc<dyn RoomBroadcaster>,
    pub clock: Arc<dyn Clock>,
}

/// 消息发送、已读回执与历史读取
pub struct MessageCoordinator {
    deps: MessageCoordinatorDependencies,
}

impl MessageCoordinator {
    pub fn new(deps: MessageCoordinatorDependencies) -> Self {
        Self { deps }
    }

    /// 持久化成功之后才会广播；缓存写入失败只记录日志，不影响发送结果。
    pub async fn send(
        &self,
        sender_id: UserId,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<Message, ApplicationError> {
        self.deps
            .router
            .authorize_send(sender_id, conversation_id)
            .await?;
        let content = MessageContent::parse(content)?;

        let message = Message::new(
            MessageId::generate(),
            conversation_id,
            sender_id,
            content,
            self.deps.clock.now(),
        );
        let mut message = self.deps.message_repository.save_message(message).await?;

        if let Err(err) = self.deps.cache.append(&message).await {
            tracing::warn!(
                conversation_id = %conversation_id,
                message_id = %message.id,
                error = %err,
                "写入消息缓存失败"
            );
        }

        self.publish(RoomBroadcast::to_room(
            conversation_id,
            ServerEvent::ReceiveMessage {
                message: message.clone(),
                status: message.delivery_status,
            },
        ))
        .await;

        // 广播即视为已送达房间内当前在线的成员
        match self
            .deps
            .message_repository
            .advance_status(&[message.id], DeliveryStatus::Delivered)
            .await
        {
            Ok(_) => {
                message.advance_status(DeliveryStatus::Delivered);
                if let Err(err) = self
                    .deps
                    .cache
                    .apply_status(conversation_id, &[message.id], DeliveryStatus::Delivered)
                    .await
                {
                    tracing::warn!(message_id = %message.id, error = %err, "同步缓存投递状态失败");
                }
                self.publish(RoomBroadcast::to_room(
                    conversation_id,
                    ServerEvent::MessageStatus {
                        message_id: message.id,
                        status: DeliveryStatus::Delivered,
                    },
                ))
                .await;
            }
            Err(err) => {
                tracing::error!(message_id = %message.id, error = %err, "更新投递状态失败");
            }
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            sender_id = %sender_id,
            "消息已发送"
        );
        Ok(message)
    }

    /// 标记已读。只处理读者参与的会话中的消息，状态事件只发往消息所属房间。
    /// 返回实际处理的消息。
    pub async fn mark_read(
        &self,
        reader_id: UserId,
        message_ids: &[MessageId],
    ) -> Result<Vec<MessageId>, ApplicationError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let messages = self
            .deps
            .message_repository
            .find_by_ids(message_ids)
            .await?;

        let mut by_conversation: BTreeMap<ConversationId, Vec<MessageId>> = BTreeMap::new();
        for message in messages {
            by_conversation
                .entry(message.conversation_id)
                .or_default()
                .push(message.id);
        }

        let mut marked = Vec::new();
        for (conversation_id, ids) in by_conversation {
            if !self
                .deps
                .router
                .is_participant(reader_id, conversation_id)
                .await?
            {
                tracing::warn!(
                    reader_id = %reader_id,
                    conversation_id = %conversation_id,
                    "忽略非参与者的已读回执"
                );
                continue;
            }

            self.deps
                .message_repository
                .advance_status(&ids, DeliveryStatus::Read)
                .await?;
            if let Err(err) = self
                .deps
                .cache
                .apply_status(conversation_id, &ids, DeliveryStatus::Read)
                .await
            {
                tracing::warn!(conversation_id = %conversation_id, error = %err, "同步缓存已读状态失败");
            }

            for id in &ids {
                self.publish(RoomBroadcast::to_room(
                    conversation_id,
                    ServerEvent::MessageStatus {
                        message_id: *id,
                        status: DeliveryStatus::Read,
                    },
                ))
                .await;
            }
            marked.extend(ids);
        }
        Ok(marked)
    }

    /// 读取会话消息（cache-aside），仅限参与者
    pub async fn get_messages(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, ApplicationError> {
        self.deps
            .router
            .authorize_send(user_id, conversation_id)
            .await?;
        self.deps.cache.load(conversation_id).await
    }

    /// 最近一次写入缓存的消息列表，不回源
    pub async fn get_cached_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<Vec<Message>>, ApplicationError> {
        self.deps.cache.get_cached(conversation_id).await
    }

    async fn publish(&self, broadcast: RoomBroadcast) {
        let event = broadcast.event.name();
        if let Err(err) = self.deps.broadcaster.publish(broadcast).await {
            tracing::warn!(event, error = %err, "广播事件失败");
        }
    }
}
