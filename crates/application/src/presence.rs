use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use domain::{PresenceStatus, UserId};
use uuid::Uuid;

use crate::{error::ApplicationError, kv_store::KeyValueStore};

const KEY_PREFIX: &str = "user:";
const KEY_SUFFIX: &str = ":status";

/// 在线状态跟踪
///
/// 每个用户一条 `user:{id}:status` 记录，值为 `online` 或 `offline`，
/// 每次写入都会重置 TTL。记录过期即视为离线，不需要后台清理任务：
/// 即使连接崩溃没有触发断开逻辑，状态也会在 TTL 之后自动收敛。
pub struct PresenceTracker {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(user_id: UserId) -> String {
        format!("{KEY_PREFIX}{user_id}{KEY_SUFFIX}")
    }

    pub async fn mark_online(&self, user_id: UserId) -> Result<(), ApplicationError> {
        self.set(user_id, PresenceStatus::Online).await
    }

    /// 写入 offline 墓碑而不是直接删除，用于在 TTL 内区分“刚刚离线”和“从未连接”
    pub async fn mark_offline(&self, user_id: UserId) -> Result<(), ApplicationError> {
        self.set(user_id, PresenceStatus::Offline).await
    }

    async fn set(&self, user_id: UserId, status: PresenceStatus) -> Result<(), ApplicationError> {
        self.store
            .set_ex(&Self::key(user_id), status.as_str(), self.ttl)
            .await?;
        tracing::debug!(user_id = %user_id, status = %status, "更新在线状态");
        Ok(())
    }

    /// `None` 表示没有未过期的记录
    pub async fn status(&self, user_id: UserId) -> Result<Option<PresenceStatus>, ApplicationError> {
        let value = self.store.get(&Self::key(user_id)).await?;
        Ok(value.and_then(|raw| PresenceStatus::from_str(&raw).ok()))
    }

    pub async fn is_online(&self, user_id: UserId) -> Result<bool, ApplicationError> {
        Ok(self.status(user_id).await? == Some(PresenceStatus::Online))
    }

    pub async fn list_online_users(&self) -> Result<BTreeSet<UserId>, ApplicationError> {
        let entries = self.store.scan_prefix(KEY_PREFIX).await?;
        let online = entries
            .into_iter()
            .filter(|(_, value)| value == PresenceStatus::Online.as_str())
            .filter_map(|(key, _)| {
                key.strip_prefix(KEY_PREFIX)
                    .and_then(|rest| rest.strip_suffix(KEY_SUFFIX))
                    .and_then(|id| Uuid::parse_str(id).ok())
                    .map(UserId::from)
            })
            .collect();
        Ok(online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_store::{memory::MemoryKeyValueStore, MockKeyValueStore, StoreError};

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(Arc::new(MemoryKeyValueStore::new()), Duration::from_secs(300))
    }

    #[tokio::test(start_paused = true)]
    async fn online_lapses_without_renewal() {
        let presence = tracker();
        let user = UserId::generate();
        presence.mark_online(user).await.unwrap();
        assert!(presence.is_online(user).await.unwrap());

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(presence.is_online(user).await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!presence.is_online(user).await.unwrap());
        assert_eq!(presence.status(user).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_slides_the_window() {
        let presence = tracker();
        let user = UserId::generate();
        presence.mark_online(user).await.unwrap();
        tokio::time::advance(Duration::from_secs(200)).await;
        presence.mark_online(user).await.unwrap();
        tokio::time::advance(Duration::from_secs(200)).await;
        assert!(presence.is_online(user).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn offline_is_a_short_lived_tombstone() {
        let presence = tracker();
        let user = UserId::generate();
        presence.mark_online(user).await.unwrap();
        presence.mark_offline(user).await.unwrap();
        assert_eq!(
            presence.status(user).await.unwrap(),
            Some(PresenceStatus::Offline)
        );
        assert!(!presence.is_online(user).await.unwrap());

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(presence.status(user).await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_online_users_ignores_offline_records() {
        let presence = tracker();
        let alice = UserId::generate();
        let bob = UserId::generate();
        presence.mark_online(alice).await.unwrap();
        presence.mark_online(bob).await.unwrap();
        presence.mark_offline(bob).await.unwrap();

        let online = presence.list_online_users().await.unwrap();
        assert_eq!(online, BTreeSet::from([alice]));
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_set_ex()
            .returning(|_, _, _| Err(StoreError::unavailable("redis down")));
        let presence = PresenceTracker::new(Arc::new(store), Duration::from_secs(300));

        let err = presence.mark_online(UserId::generate()).await.unwrap_err();
        assert!(err.is_internal());
    }
}
