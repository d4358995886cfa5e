//! Redis 键值存储
//!
//! 基于 `ConnectionManager`，断线后自动重连；克隆成本很低，每次调用克隆一份。

use std::time::Duration;

use application::{KeyValueStore, StoreError};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};

const SCAN_BATCH: usize = 200;

fn map_redis_err(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        StoreError::unavailable(err.to_string())
    } else {
        StoreError::command(err.to_string())
    }
}

#[derive(Clone)]
pub struct RedisKeyValueStore {
    connection: ConnectionManager,
}

impl RedisKeyValueStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|err| StoreError::command(err.to_string()))?;
        let connection = ConnectionManager::new(client).await.map_err(map_redis_err)?;
        tracing::info!("Redis 连接已建立");
        Ok(Self { connection })
    }

    pub fn from_manager(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    /// 健康检查
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_redis_err)
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        conn.get::<_, Option<String>>(key).await.map_err(map_redis_err)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds)
            .await
            .map_err(map_redis_err)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key).await.map_err(map_redis_err)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let mut conn = self.connection.clone();
        let pattern = format!("{prefix}*");

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(map_redis_err)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        if keys.is_empty() {
            return Ok(Vec::new());
        }
        keys.sort();
        keys.dedup();

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        // SCAN 和 MGET 之间过期的键直接跳过
        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|value| (key, value)))
            .collect())
    }
}
