use std::sync::Arc;

use application::{
    CredentialStore, KeyValueStore, MessageRepository, ParticipantRepository, PasswordHasher,
    StoreError, UserRepository,
};
use config::AppConfig;
use thiserror::Error;

use crate::{
    kv_store::RedisKeyValueStore,
    migrations::MIGRATOR,
    password::BcryptPasswordHasher,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] StoreError),
}

/// 连接好的外部依赖：Postgres 仓储、Redis 键值存储、bcrypt 哈希器
#[derive(Clone)]
pub struct Infrastructure {
    pub storage: PgStorage,
    pub key_value_store: Arc<RedisKeyValueStore>,
    pub password_hasher: Arc<BcryptPasswordHasher>,
}

impl Infrastructure {
    /// 建立连接池并执行迁移，然后连接 Redis
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!("数据库迁移完成");

        let key_value_store = Arc::new(RedisKeyValueStore::connect(&config.redis.url).await?);
        let password_hasher = Arc::new(BcryptPasswordHasher::new(Some(config.server.bcrypt_cost)));

        Ok(Self {
            storage: PgStorage::new(pool),
            key_value_store,
            password_hasher,
        })
    }

    pub fn user_repository(&self) -> Arc<dyn UserRepository> {
        self.storage.user_repository.clone()
    }

    pub fn credential_store(&self) -> Arc<dyn CredentialStore> {
        self.storage.credential_store.clone()
    }

    pub fn participant_repository(&self) -> Arc<dyn ParticipantRepository> {
        self.storage.participant_repository.clone()
    }

    pub fn message_repository(&self) -> Arc<dyn MessageRepository> {
        self.storage.message_repository.clone()
    }

    pub fn key_value_store(&self) -> Arc<dyn KeyValueStore> {
        self.key_value_store.clone()
    }

    pub fn password_hasher(&self) -> Arc<dyn PasswordHasher> {
        self.password_hasher.clone()
    }
}
