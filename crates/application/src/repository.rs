use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, DeliveryStatus, Message, MessageId, RefreshToken,
    RepositoryError, User, UserEmail, UserId, Username,
};

/// users 表上的唯一约束名，冲突时用于区分重复的字段
pub const USERS_EMAIL_CONSTRAINT: &str = "users_email_key";
pub const USERS_USERNAME_CONSTRAINT: &str = "users_username_key";

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_username(&self, username: &Username) -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError>;

    /// 登录标识既可以是用户名也可以是邮箱
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, RepositoryError>;

    /// 在同一个事务中创建用户及其首个刷新令牌，任何一步失败都整体回滚
    async fn create_with_refresh_token(
        &self,
        user: User,
        token: RefreshToken,
    ) -> Result<User, RepositoryError>;
}

/// 刷新令牌的持久化存储，独占 RefreshToken 行的生命周期
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn create(&self, token: RefreshToken) -> Result<(), RepositoryError>;
    async fn find_by_token(&self, token: &str) -> Result<Option<RefreshToken>, RepositoryError>;

    /// 返回是否删除了记录
    async fn delete_by_token(&self, token: &str) -> Result<bool, RepositoryError>;

    async fn delete_all_for_user(&self, user_id: UserId) -> Result<u64, RepositoryError>;

    /// 原子地删除该用户所有刷新令牌并写入新令牌（登录时使旧会话失效）。
    /// 同一用户的 `replace_for_user` 与 `rotate` 必须串行，结束后该用户只剩一行。
    async fn replace_for_user(&self, token: RefreshToken) -> Result<(), RepositoryError>;

    /// 原子轮换：删除 `presented` 对应且属于同一用户的行，再写入 `replacement`。
    /// `presented` 不存在时不写入任何数据并返回 `false`。
    /// 并发使用同一个令牌时至多一个调用返回 `true`。
    async fn rotate(
        &self,
        presented: &str,
        replacement: RefreshToken,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ParticipantRepository: Send + Sync {
    /// 用户参与的全部会话
    async fn list_conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Conversation>, RepositoryError>;

    async fn is_participant(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 持久化一条新消息，成功返回后才允许广播
    async fn save_message(&self, message: Message) -> Result<Message, RepositoryError>;

    async fn find_by_ids(&self, ids: &[MessageId]) -> Result<Vec<Message>, RepositoryError>;

    /// 按创建时间升序返回会话的全部消息
    async fn list_by_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, RepositoryError>;

    /// 把消息状态推进到 `status`，已处于相同或更靠后状态的消息保持不变。
    /// 返回实际更新的行数。
    async fn advance_status(
        &self,
        ids: &[MessageId],
        status: DeliveryStatus,
    ) -> Result<u64, RepositoryError>;
}

pub mod memory {
    //! 进程内存储，所有表共用一把锁，因此每个方法天然是一个原子单元。

    use std::collections::{HashMap, HashSet};
    use std::sync::{Mutex, MutexGuard};

    use async_trait::async_trait;
    use domain::{
        Conversation, ConversationId, DeliveryStatus, Message, MessageId, Participant,
        RefreshToken, RepositoryError, User, UserEmail, UserId, Username,
    };

    use super::{
        CredentialStore, MessageRepository, ParticipantRepository, UserRepository,
        USERS_EMAIL_CONSTRAINT, USERS_USERNAME_CONSTRAINT,
    };

    #[derive(Debug, Default)]
    struct Tables {
        users: HashMap<UserId, User>,
        refresh_tokens: HashMap<String, RefreshToken>,
        conversations: HashMap<ConversationId, Conversation>,
        participants: HashSet<Participant>,
        messages: Vec<Message>,
    }

    #[derive(Debug, Default)]
    pub struct InMemoryStorage {
        tables: Mutex<Tables>,
    }

    impl InMemoryStorage {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> Result<MutexGuard<'_, Tables>, RepositoryError> {
            self.tables
                .lock()
                .map_err(|_| RepositoryError::storage("in-memory storage poisoned"))
        }

        fn tables(&self) -> MutexGuard<'_, Tables> {
            self.tables
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
        }

        pub fn add_conversation(&self, conversation: Conversation) {
            self.tables()
                .conversations
                .insert(conversation.id, conversation);
        }

        pub fn add_participant(&self, user_id: UserId, conversation_id: ConversationId) {
            self.tables()
                .participants
                .insert(Participant::new(user_id, conversation_id));
        }

        pub fn remove_participant(&self, user_id: UserId, conversation_id: ConversationId) {
            self.tables()
                .participants
                .remove(&Participant::new(user_id, conversation_id));
        }

        pub fn refresh_tokens_for(&self, user_id: UserId) -> Vec<RefreshToken> {
            self.tables()
                .refresh_tokens
                .values()
                .filter(|token| token.user_id == user_id)
                .cloned()
                .collect()
        }

        pub fn user_count(&self) -> usize {
            self.tables().users.len()
        }

        pub fn messages_in(&self, conversation_id: ConversationId) -> Vec<Message> {
            self.tables()
                .messages
                .iter()
                .filter(|message| message.conversation_id == conversation_id)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl UserRepository for InMemoryStorage {
        async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
            Ok(self.lock()?.users.get(&id).cloned())
        }

        async fn find_by_username(
            &self,
            username: &Username,
        ) -> Result<Option<User>, RepositoryError> {
            Ok(self
                .lock()?
                .users
                .values()
                .find(|user| &user.username == username)
                .cloned())
        }

        async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError> {
            Ok(self
                .lock()?
                .users
                .values()
                .find(|user| &user.email == email)
                .cloned())
        }

        async fn find_by_identifier(
            &self,
            identifier: &str,
        ) -> Result<Option<User>, RepositoryError> {
            Ok(self
                .lock()?
                .users
                .values()
                .find(|user| user.matches_identifier(identifier))
                .cloned())
        }

        async fn create_with_refresh_token(
            &self,
            user: User,
            token: RefreshToken,
        ) -> Result<User, RepositoryError> {
            let mut tables = self.lock()?;
            if tables.users.values().any(|u| u.email == user.email) {
                return Err(RepositoryError::conflict(Some(USERS_EMAIL_CONSTRAINT)));
            }
            if tables.users.values().any(|u| u.username == user.username) {
                return Err(RepositoryError::conflict(Some(USERS_USERNAME_CONSTRAINT)));
            }
            if tables.refresh_tokens.contains_key(&token.token) {
                return Err(RepositoryError::conflict(Some("refresh_tokens_token_key")));
            }
            tables.users.insert(user.id, user.clone());
            tables.refresh_tokens.insert(token.token.clone(), token);
            Ok(user)
        }
    }

    #[async_trait]
    impl CredentialStore for InMemoryStorage {
        async fn create(&self, token: RefreshToken) -> Result<(), RepositoryError> {
            let mut tables = self.lock()?;
            if tables.refresh_tokens.contains_key(&token.token) {
                return Err(RepositoryError::conflict(Some("refresh_tokens_token_key")));
            }
            tables.refresh_tokens.insert(token.token.clone(), token);
            Ok(())
        }

        async fn find_by_token(&self, token: &str) -> Result<Option<RefreshToken>, RepositoryError> {
            Ok(self.lock()?.refresh_tokens.get(token).cloned())
        }

        async fn delete_by_token(&self, token: &str) -> Result<bool, RepositoryError> {
            Ok(self.lock()?.refresh_tokens.remove(token).is_some())
        }

        async fn delete_all_for_user(&self, user_id: UserId) -> Result<u64, RepositoryError> {
            let mut tables = self.lock()?;
            let before = tables.refresh_tokens.len();
            tables
                .refresh_tokens
                .retain(|_, token| token.user_id != user_id);
            Ok((before - tables.refresh_tokens.len()) as u64)
        }

        async fn replace_for_user(&self, token: RefreshToken) -> Result<(), RepositoryError> {
            let mut tables = self.lock()?;
            let user_id = token.user_id;
            tables
                .refresh_tokens
                .retain(|_, existing| existing.user_id != user_id);
            tables.refresh_tokens.insert(token.token.clone(), token);
            Ok(())
        }

        async fn rotate(
            &self,
            presented: &str,
            replacement: RefreshToken,
        ) -> Result<bool, RepositoryError> {
            let mut tables = self.lock()?;
            match tables.refresh_tokens.get(presented) {
                Some(existing) if existing.user_id == replacement.user_id => {}
                _ => return Ok(false),
            }
            tables.refresh_tokens.remove(presented);
            tables
                .refresh_tokens
                .insert(replacement.token.clone(), replacement);
            Ok(true)
        }
    }

    #[async_trait]
    impl ParticipantRepository for InMemoryStorage {
        async fn list_conversations(
            &self,
            user_id: UserId,
        ) -> Result<Vec<Conversation>, RepositoryError> {
            let tables = self.lock()?;
            let mut conversations: Vec<Conversation> = tables
                .participants
                .iter()
                .filter(|p| p.user_id == user_id)
                .filter_map(|p| tables.conversations.get(&p.conversation_id).cloned())
                .collect();
            conversations.sort_by_key(|c| c.id);
            Ok(conversations)
        }

        async fn is_participant(
            &self,
            user_id: UserId,
            conversation_id: ConversationId,
        ) -> Result<bool, RepositoryError> {
            Ok(self
                .lock()?
                .participants
                .contains(&Participant::new(user_id, conversation_id)))
        }
    }

    #[async_trait]
    impl MessageRepository for InMemoryStorage {
        async fn save_message(&self, message: Message) -> Result<Message, RepositoryError> {
            let mut tables = self.lock()?;
            if !tables.conversations.contains_key(&message.conversation_id) {
                return Err(RepositoryError::NotFound);
            }
            tables.messages.push(message.clone());
            Ok(message)
        }

        async fn find_by_ids(&self, ids: &[MessageId]) -> Result<Vec<Message>, RepositoryError> {
            Ok(self
                .lock()?
                .messages
                .iter()
                .filter(|message| ids.contains(&message.id))
                .cloned()
                .collect())
        }

        async fn list_by_conversation(
            &self,
            conversation_id: ConversationId,
        ) -> Result<Vec<Message>, RepositoryError> {
            let mut messages: Vec<Message> = self
                .lock()?
                .messages
                .iter()
                .filter(|message| message.conversation_id == conversation_id)
                .cloned()
                .collect();
            messages.sort_by_key(|message| message.created_at);
            Ok(messages)
        }

        async fn advance_status(
            &self,
            ids: &[MessageId],
            status: DeliveryStatus,
        ) -> Result<u64, RepositoryError> {
            let mut tables = self.lock()?;
            let updated = tables
                .messages
                .iter_mut()
                .filter(|message| ids.contains(&message.id))
                .map(|message| message.advance_status(status))
                .filter(|changed| *changed)
                .count();
            Ok(updated as u64)
        }
    }

}
