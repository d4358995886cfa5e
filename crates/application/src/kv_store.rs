//! 带过期时间的键值存储抽象
//!
//! 在线状态和消息缓存都只依赖这个接口，生产环境由 Redis 实现，
//! 测试中注入 [`memory::MemoryKeyValueStore`]。

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store command failed: {0}")]
    Command(String),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn command(message: impl Into<String>) -> Self {
        Self::Command(message.into())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// 写入并设置过期时间，覆盖已有值并重置 TTL
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// 列出所有以 `prefix` 开头且尚未过期的键值对
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;
}

pub mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::{KeyValueStore, StoreError};

    /// 进程内实现。过期在读取时惰性判断，使用 tokio 时钟以便测试中暂停/快进时间。
    #[derive(Debug, Default)]
    pub struct MemoryKeyValueStore {
        entries: Mutex<HashMap<String, (String, Instant)>>,
    }

    impl MemoryKeyValueStore {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>>, StoreError> {
            self.entries
                .lock()
                .map_err(|_| StoreError::unavailable("memory store poisoned"))
        }
    }

    #[async_trait]
    impl KeyValueStore for MemoryKeyValueStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            let mut entries = self.lock()?;
            let now = Instant::now();
            match entries.get(key) {
                Some((value, expires_at)) if *expires_at > now => Ok(Some(value.clone())),
                Some(_) => {
                    entries.remove(key);
                    Ok(None)
                }
                None => Ok(None),
            }
        }

        async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
            let mut entries = self.lock()?;
            entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.lock()?.remove(key);
            Ok(())
        }

        async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
            let mut entries = self.lock()?;
            let now = Instant::now();
            entries.retain(|_, (_, expires_at)| *expires_at > now);
            let mut found: Vec<(String, String)> = entries
                .iter()
                .filter(|(key, _)| key.starts_with(prefix))
                .map(|(key, (value, _))| (key.clone(), value.clone()))
                .collect();
            found.sort();
            Ok(found)
        }
    }

}
