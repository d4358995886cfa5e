use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationId, UserId};

/// 会话。对本系统而言是静态数据，只读不写。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub is_group: bool,
    pub name: Option<String>,
}

/// 参与关系（user_id, conversation_id 组合主键），决定房间成员资格
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Participant {
    pub user_id: UserId,
    pub conversation_id: ConversationId,
}

impl Participant {
    pub fn new(user_id: UserId, conversation_id: ConversationId) -> Self {
        Self {
            user_id,
            conversation_id,
        }
    }
}
