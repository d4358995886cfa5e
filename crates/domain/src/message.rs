use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationId, MessageContent, MessageId, Timestamp, UserId};

/// 消息投递状态，只能单向前进：SENT → DELIVERED → READ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// 持久化使用的序号，保持与枚举顺序一致
    pub fn rank(self) -> i16 {
        match self {
            DeliveryStatus::Sent => 0,
            DeliveryStatus::Delivered => 1,
            DeliveryStatus::Read => 2,
        }
    }

    pub fn from_rank(rank: i16) -> Option<Self> {
        match rank {
            0 => Some(DeliveryStatus::Sent),
            1 => Some(DeliveryStatus::Delivered),
            2 => Some(DeliveryStatus::Read),
            _ => None,
        }
    }

    /// 是否允许从当前状态迁移到 `next`（不允许回退，也不允许原地迁移）
    pub fn can_advance_to(self, next: DeliveryStatus) -> bool {
        next > self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: MessageContent,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
    pub delivery_status: DeliveryStatus,
}

impl Message {
    /// 新消息，初始状态为 SENT
    pub fn new(
        id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: MessageContent,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sender_id,
            content,
            created_at,
            delivery_status: DeliveryStatus::Sent,
        }
    }

    /// 推进投递状态；状态不会回退，返回是否发生变化
    pub fn advance_status(&mut self, next: DeliveryStatus) -> bool {
        if self.delivery_status.can_advance_to(next) {
            self.delivery_status = next;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn sample() -> Message {
        Message::new(
            MessageId::generate(),
            ConversationId::generate(),
            UserId::generate(),
            MessageContent::parse("hi").unwrap(),
            OffsetDateTime::now_utc(),
        )
    }

    #[test]
    fn status_never_moves_backwards() {
        let mut message = sample();
        assert_eq!(message.delivery_status, DeliveryStatus::Sent);
        assert!(message.advance_status(DeliveryStatus::Delivered));
        assert!(message.advance_status(DeliveryStatus::Read));
        assert!(!message.advance_status(DeliveryStatus::Delivered));
        assert_eq!(message.delivery_status, DeliveryStatus::Read);
    }

    #[test]
    fn rank_round_trips_and_orders() {
        for status in [
            DeliveryStatus::Sent,
            DeliveryStatus::Delivered,
            DeliveryStatus::Read,
        ] {
            assert_eq!(DeliveryStatus::from_rank(status.rank()), Some(status));
        }
        assert!(DeliveryStatus::Sent.rank() < DeliveryStatus::Read.rank());
        assert_eq!(DeliveryStatus::from_rank(7), None);
    }

    #[test]
    fn serializes_in_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["deliveryStatus"], "sent");
        assert!(json.get("conversationId").is_some());
        assert!(json["createdAt"].is_string());
    }
}
