//! 基础设施层实现。
//!
//! 提供 Postgres 仓储、Redis 键值存储、bcrypt 密码哈希等适配器，
//! 实现应用层定义的接口。

pub mod builder;
pub mod kv_store;
pub mod migrations;
pub mod password;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError};
pub use kv_store::RedisKeyValueStore;
pub use migrations::MIGRATOR;
pub use password::BcryptPasswordHasher;
pub use repository::{
    create_pg_pool, PgCredentialStore, PgMessageRepository, PgParticipantRepository, PgStorage,
    PgUserRepository,
};
