//! 会话消息缓存（cache-aside）
//!
//! 每个会话一条 `messages:{conversationId}` 记录，整体存放按创建时间升序的
//! 消息列表 JSON，TTL 从最后一次写入开始计算。持久化层始终是权威数据源。

use std::sync::Arc;
use std::time::Duration;

use domain::{ConversationId, DeliveryStatus, Message, MessageId};
use tokio::sync::Mutex;

use crate::{error::ApplicationError, kv_store::KeyValueStore, repository::MessageRepository};

pub struct MessageCache {
    store: Arc<dyn KeyValueStore>,
    messages: Arc<dyn MessageRepository>,
    ttl: Duration,
    // 读-改-写需要串行，否则并发发送会互相覆盖列表
    write_lock: Mutex<()>,
}

impl MessageCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        messages: Arc<dyn MessageRepository>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            messages,
            ttl,
            write_lock: Mutex::new(()),
        }
    }

    fn key(conversation_id: ConversationId) -> String {
        format!("messages:{conversation_id}")
    }

    /// 只读缓存，不回源
    pub async fn get_cached(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<Vec<Message>>, ApplicationError> {
        let Some(raw) = self.store.get(&Self::key(conversation_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Vec<Message>>(&raw) {
            Ok(messages) => Ok(Some(messages)),
            Err(err) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %err,
                    "缓存内容无法解析，按未命中处理"
                );
                Ok(None)
            }
        }
    }

    /// 读路径：命中直接返回，未命中从持久化层重建并回填
    pub async fn load(&self, conversation_id: ConversationId) -> Result<Vec<Message>, ApplicationError> {
        match self.get_cached(conversation_id).await {
            Ok(Some(messages)) => return Ok(messages),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(conversation_id = %conversation_id, error = %err, "读取消息缓存失败，回源数据库");
            }
        }

        // 回填与 append 串行：拿到锁后再查一次，避免用旧快照覆盖刚追加的消息
        let _guard = self.write_lock.lock().await;
        if let Ok(Some(messages)) = self.get_cached(conversation_id).await {
            return Ok(messages);
        }
        let messages = self.messages.list_by_conversation(conversation_id).await?;
        if let Err(err) = self.write(conversation_id, &messages).await {
            tracing::warn!(conversation_id = %conversation_id, error = %err, "回填消息缓存失败");
        }
        Ok(messages)
    }

    /// 追加新消息并刷新 TTL。没有缓存时先从持久化层重建完整列表。
    pub async fn append(&self, message: &Message) -> Result<(), ApplicationError> {
        let _guard = self.write_lock.lock().await;
        let conversation_id = message.conversation_id;

        let mut messages = match self.get_cached(conversation_id).await? {
            Some(messages) => messages,
            None => self.messages.list_by_conversation(conversation_id).await?,
        };
        match messages.iter_mut().find(|cached| cached.id == message.id) {
            Some(cached) => *cached = message.clone(),
            None => messages.push(message.clone()),
        }
        messages.sort_by_key(|cached| cached.created_at);

        self.write(conversation_id, &messages).await
    }

    /// 同步缓存中的投递状态；缓存不存在时什么都不做，下次读取会从持久化层重建
    pub async fn apply_status(
        &self,
        conversation_id: ConversationId,
        ids: &[MessageId],
        status: DeliveryStatus,
    ) -> Result<(), ApplicationError> {
        let _guard = self.write_lock.lock().await;
        let Some(mut messages) = self.get_cached(conversation_id).await? else {
            return Ok(());
        };

        let mut changed = false;
        for message in messages.iter_mut().filter(|m| ids.contains(&m.id)) {
            changed |= message.advance_status(status);
        }
        if changed {
            self.write(conversation_id, &messages).await?;
        }
        Ok(())
    }

    async fn write(
        &self,
        conversation_id: ConversationId,
        messages: &[Message],
    ) -> Result<(), ApplicationError> {
        let payload = serde_json::to_string(messages)
            .map_err(|err| ApplicationError::infrastructure(format!("encode cache entry: {err}")))?;
        self.store
            .set_ex(&Self::key(conversation_id), &payload, self.ttl)
            .await?;
        Ok(())
    }
}
