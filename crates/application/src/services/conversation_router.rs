use std::collections::HashSet;
use std::sync::Arc;

use domain::{Conversation, ConversationId, DomainError, UserId};

use crate::{error::ApplicationError, repository::ParticipantRepository};

/// `resolve_rooms` 的结果。只能由路由器构造，
/// 因此连接加入的房间一定来自参与关系查询。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedRooms(HashSet<ConversationId>);

impl ResolvedRooms {
    pub fn contains(&self, conversation_id: &ConversationId) -> bool {
        self.0.contains(conversation_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// 单个连接当前加入的房间
#[derive(Debug, Default)]
pub struct RoomMembership {
    joined: HashSet<ConversationId>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, conversation_id: &ConversationId) -> bool {
        self.joined.contains(conversation_id)
    }

    pub fn rooms(&self) -> Vec<ConversationId> {
        let mut rooms: Vec<_> = self.joined.iter().copied().collect();
        rooms.sort();
        rooms
    }

    pub fn is_empty(&self) -> bool {
        self.joined.is_empty()
    }

    /// 离开全部房间，返回离开前的房间列表
    pub fn leave_all(&mut self) -> Vec<ConversationId> {
        let rooms = self.rooms();
        self.joined.clear();
        rooms
    }
}

pub struct ConversationRouter {
    participants: Arc<dyn ParticipantRepository>,
}

impl ConversationRouter {
    pub fn new(participants: Arc<dyn ParticipantRepository>) -> Self {
        Self { participants }
    }

    pub async fn conversations_for(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Conversation>, ApplicationError> {
        Ok(self.participants.list_conversations(user_id).await?)
    }

    /// 建立连接时调用一次
    pub async fn resolve_rooms(&self, user_id: UserId) -> Result<ResolvedRooms, ApplicationError> {
        let conversations = self.participants.list_conversations(user_id).await?;
        Ok(ResolvedRooms(
            conversations.into_iter().map(|c| c.id).collect(),
        ))
    }

    pub fn join_rooms(&self, membership: &mut RoomMembership, rooms: &ResolvedRooms) {
        membership.joined.extend(rooms.0.iter().copied());
    }

    pub async fn is_participant(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<bool, ApplicationError> {
        Ok(self
            .participants
            .is_participant(user_id, conversation_id)
            .await?)
    }

    /// 每次发送都重新检查成员关系，查询失败时按拒绝处理
    pub async fn authorize_send(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<(), ApplicationError> {
        if self.is_participant(user_id, conversation_id).await? {
            Ok(())
        } else {
            Err(DomainError::NotParticipant.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryStorage;

    fn conversation() -> Conversation {
        Conversation {
            id: ConversationId::generate(),
            is_group: true,
            name: Some("team".to_string()),
        }
    }

    #[tokio::test]
    async fn joins_only_resolved_rooms() {
        let storage = Arc::new(InMemoryStorage::new());
        let mine = conversation();
        let other = conversation();
        storage.add_conversation(mine.clone());
        storage.add_conversation(other.clone());
        let user = UserId::generate();
        storage.add_participant(user, mine.id);

        let router = ConversationRouter::new(storage);
        let rooms = router.resolve_rooms(user).await.unwrap();
        let mut membership = RoomMembership::new();
        router.join_rooms(&mut membership, &rooms);

        assert!(membership.contains(&mine.id));
        assert!(!membership.contains(&other.id));
        assert_eq!(membership.leave_all(), vec![mine.id]);
        assert!(membership.is_empty());
    }

    #[tokio::test]
    async fn authorize_send_rechecks_membership() {
        let storage = Arc::new(InMemoryStorage::new());
        let room = conversation();
        storage.add_conversation(room.clone());
        let user = UserId::generate();
        storage.add_participant(user, room.id);
        let router = ConversationRouter::new(storage.clone());

        assert!(router.authorize_send(user, room.id).await.is_ok());

        storage.remove_participant(user, room.id);
        let err = router.authorize_send(user, room.id).await.unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::NotParticipant)
        ));
    }
}
