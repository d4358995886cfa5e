use std::sync::Arc;

use application::{CredentialStore, MessageRepository, ParticipantRepository, UserRepository};
use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, DeliveryStatus, Message, MessageContent, MessageId,
    PasswordHash, RefreshToken, RefreshTokenId, RepositoryError, User, UserEmail, UserId,
    Username,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            RepositoryError::conflict(db_err.constraint())
        }
        // 引用的会话或用户不存在
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
            RepositoryError::NotFound
        }
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    created_at: OffsetDateTime,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let username =
            Username::parse(value.username).map_err(|err| invalid_data(err.to_string()))?;
        let email = UserEmail::parse(value.email).map_err(|err| invalid_data(err.to_string()))?;
        let password =
            PasswordHash::new(value.password_hash).map_err(|err| invalid_data(err.to_string()))?;

        Ok(User {
            id: UserId::from(value.id),
            username,
            email,
            password,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RefreshTokenRecord {
    id: Uuid,
    user_id: Uuid,
    token: String,
    expires_at: OffsetDateTime,
}

impl From<RefreshTokenRecord> for RefreshToken {
    fn from(value: RefreshTokenRecord) -> Self {
        RefreshToken {
            id: RefreshTokenId::from(value.id),
            user_id: UserId::from(value.user_id),
            token: value.token,
            expires_at: value.expires_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: Uuid,
    is_group: bool,
    name: Option<String>,
}

impl From<ConversationRecord> for Conversation {
    fn from(value: ConversationRecord) -> Self {
        Conversation {
            id: ConversationId::from(value.id),
            is_group: value.is_group,
            name: value.name,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: String,
    delivery_status: i16,
    created_at: OffsetDateTime,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::parse(&value.content).map_err(|err| invalid_data(err.to_string()))?;
        let delivery_status = DeliveryStatus::from_rank(value.delivery_status).ok_or_else(|| {
            invalid_data(format!("unknown delivery status {}", value.delivery_status))
        })?;

        Ok(Message {
            id: MessageId::from(value.id),
            conversation_id: ConversationId::from(value.conversation_id),
            sender_id: UserId::from(value.sender_id),
            content,
            created_at: value.created_at,
            delivery_status,
        })
    }
}

const USER_COLUMNS: &str = "id, username, email, password_hash, created_at";
const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, content, delivery_status, created_at";

async fn insert_refresh_token(
    tx: &mut Transaction<'_, Postgres>,
    token: &RefreshToken,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (id, user_id, token, expires_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::from(token.id))
    .bind(Uuid::from(token.user_id))
    .bind(&token.token)
    .bind(token.expires_at)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_err)?;
    Ok(())
}

/// 锁住用户行，同一用户的会话写入在事务内串行执行。
/// 用户不存在时返回 `NotFound`。
async fn lock_user_sessions(
    tx: &mut Transaction<'_, Postgres>,
    user_id: UserId,
) -> Result<(), RepositoryError> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(Uuid::from(user_id))
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_err)?
        .map(|_| ())
        .ok_or(RepositoryError::NotFound)
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {clause}");
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        record.map(User::try_from).transpose()
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        record.map(User::try_from).transpose()
    }

    async fn find_by_username(&self, username: &Username) -> Result<Option<User>, RepositoryError> {
        self.fetch_one_where("username = $1", username.as_str()).await
    }

    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError> {
        self.fetch_one_where("email = $1", email.as_str()).await
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, RepositoryError> {
        let identifier = identifier.trim();
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR email = $2 \
             ORDER BY (username = $1) DESC LIMIT 1"
        );
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(identifier)
            .bind(identifier.to_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        record.map(User::try_from).transpose()
    }

    async fn create_with_refresh_token(
        &self,
        user: User,
        token: RefreshToken,
    ) -> Result<User, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let sql = format!(
            "INSERT INTO users (id, username, email, password_hash, created_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        );
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(Uuid::from(user.id))
            .bind(user.username.as_str())
            .bind(user.email.as_str())
            .bind(user.password.as_str())
            .bind(user.created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        insert_refresh_token(&mut tx, &token).await?;
        tx.commit().await.map_err(map_sqlx_err)?;

        User::try_from(record)
    }
}

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn create(&self, token: RefreshToken) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        insert_refresh_token(&mut tx, &token).await?;
        tx.commit().await.map_err(map_sqlx_err)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<RefreshToken>, RepositoryError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            SELECT id, user_id, token, expires_at
            FROM refresh_tokens
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.map(RefreshToken::from))
    }

    async fn delete_by_token(&self, token: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all_for_user(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(Uuid::from(user_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }

    async fn replace_for_user(&self, token: RefreshToken) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        lock_user_sessions(&mut tx, token.user_id).await?;
        sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(Uuid::from(token.user_id))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        insert_refresh_token(&mut tx, &token).await?;
        tx.commit().await.map_err(map_sqlx_err)
    }

    async fn rotate(
        &self,
        presented: &str,
        replacement: RefreshToken,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        // 与登录的整体替换互斥；排在后面的轮换看不到已被删除的令牌
        match lock_user_sessions(&mut tx, replacement.user_id).await {
            Ok(()) => {}
            Err(RepositoryError::NotFound) => return Ok(false),
            Err(err) => return Err(err),
        }

        let deleted = sqlx::query("DELETE FROM refresh_tokens WHERE token = $1 AND user_id = $2")
            .bind(presented)
            .bind(Uuid::from(replacement.user_id))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await.map_err(map_sqlx_err)?;
            return Ok(false);
        }

        insert_refresh_token(&mut tx, &replacement).await?;
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(true)
    }
}

#[derive(Clone)]
pub struct PgParticipantRepository {
    pool: PgPool,
}

impl PgParticipantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParticipantRepository for PgParticipantRepository {
    async fn list_conversations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let records = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT c.id, c.is_group, c.name
            FROM conversations c
            JOIN participants p ON p.conversation_id = c.id
            WHERE p.user_id = $1
            ORDER BY c.id
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(records.into_iter().map(Conversation::from).collect())
    }

    async fn is_participant(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<bool, RepositoryError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM participants
                WHERE user_id = $1 AND conversation_id = $2
            )
            "#,
        )
        .bind(Uuid::from(user_id))
        .bind(Uuid::from(conversation_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(exists)
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn save_message(&self, message: Message) -> Result<Message, RepositoryError> {
        let sql = format!(
            "INSERT INTO messages (id, conversation_id, sender_id, content, delivery_status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {MESSAGE_COLUMNS}"
        );
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::from(message.id))
            .bind(Uuid::from(message.conversation_id))
            .bind(Uuid::from(message.sender_id))
            .bind(message.content.as_str())
            .bind(message.delivery_status.rank())
            .bind(message.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Message::try_from(record)
    }

    async fn find_by_ids(&self, ids: &[MessageId]) -> Result<Vec<Message>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = ids.iter().copied().map(Uuid::from).collect();
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ANY($1)");
        let records = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(&ids)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        records.into_iter().map(Message::try_from).collect()
    }

    async fn list_by_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 \
             ORDER BY created_at ASC, id ASC"
        );
        let records = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::from(conversation_id))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        records.into_iter().map(Message::try_from).collect()
    }

    async fn advance_status(
        &self,
        ids: &[MessageId],
        status: DeliveryStatus,
    ) -> Result<u64, RepositoryError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = ids.iter().copied().map(Uuid::from).collect();
        // 只向前推进，状态序号与枚举顺序一致
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET delivery_status = $2
            WHERE id = ANY($1) AND delivery_status < $2
            "#,
        )
        .bind(&ids)
        .bind(status.rank())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }
}

/// 共享同一个连接池的全部 Postgres 仓储
#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub credential_store: Arc<PgCredentialStore>,
    pub participant_repository: Arc<PgParticipantRepository>,
    pub message_repository: Arc<PgMessageRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            credential_store: Arc::new(PgCredentialStore::new(pool.clone())),
            participant_repository: Arc::new(PgParticipantRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
