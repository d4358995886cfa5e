//! 应用层集成测试的公共装配：内存存储 + 内存键值存储 + 进程内广播

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use application::{
    kv_store::memory::MemoryKeyValueStore, repository::memory::InMemoryStorage, AuthGateway,
    AuthGatewayDependencies, Clock, ConversationRouter, KeyValueStore, LocalRoomBroadcaster,
    MessageCache, MessageCoordinator, MessageCoordinatorDependencies, MessageRepository,
    PasswordHasher, PasswordHasherError, PresenceTracker, RealtimeServices, RoomBroadcaster,
    SystemClock, TokenService,
};
use async_trait::async_trait;
use config::JwtConfig;
use domain::{Conversation, ConversationId, PasswordHash, UserId};

/// 可逆的“哈希”，避免测试里跑 bcrypt
pub struct PlainHasher;

#[async_trait]
impl PasswordHasher for PlainHasher {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
        PasswordHash::new(format!("plain:{plaintext}"))
            .map_err(|err| PasswordHasherError::new(err.to_string()))
    }

    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError> {
        Ok(hashed.as_str() == format!("plain:{plaintext}"))
    }
}

pub fn jwt_config() -> JwtConfig {
    JwtConfig {
        access_secret: "integration-access-secret-0123456789abcdef".to_string(),
        refresh_secret: "integration-refresh-secret-0123456789abcdef".to_string(),
        access_ttl_minutes: 15,
        refresh_ttl_days: 7,
        remember_me_ttl_days: 30,
    }
}

pub fn auth_gateway(storage: Arc<InMemoryStorage>, clock: Arc<dyn Clock>) -> AuthGateway {
    AuthGateway::new(AuthGatewayDependencies {
        user_repository: storage.clone(),
        credential_store: storage,
        password_hasher: Arc::new(PlainHasher),
        token_service: Arc::new(TokenService::new(&jwt_config(), clock.clone())),
        clock,
    })
}

pub struct ChatHarness {
    pub storage: Arc<InMemoryStorage>,
    pub store: Arc<dyn KeyValueStore>,
    pub broadcaster: Arc<dyn RoomBroadcaster>,
    pub presence: Arc<PresenceTracker>,
    pub coordinator: Arc<MessageCoordinator>,
    pub realtime: Arc<RealtimeServices>,
}

impl ChatHarness {
    pub fn new() -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        Self::with_backends(
            storage.clone(),
            storage,
            Arc::new(MemoryKeyValueStore::new()),
        )
    }

    /// 可以替换消息仓储和键值存储，用于注入故障
    pub fn with_backends(
        storage: Arc<InMemoryStorage>,
        messages: Arc<dyn MessageRepository>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let broadcaster: Arc<dyn RoomBroadcaster> = Arc::new(LocalRoomBroadcaster::new(256));
        let router = Arc::new(ConversationRouter::new(storage.clone()));
        let cache = Arc::new(MessageCache::new(
            store.clone(),
            messages.clone(),
            Duration::from_secs(3600),
        ));
        let coordinator = Arc::new(MessageCoordinator::new(MessageCoordinatorDependencies {
            router: router.clone(),
            message_repository: messages,
            cache,
            broadcaster: broadcaster.clone(),
            clock: Arc::new(SystemClock),
        }));
        let presence = Arc::new(PresenceTracker::new(store.clone(), Duration::from_secs(300)));
        let realtime = Arc::new(RealtimeServices {
            router,
            coordinator: coordinator.clone(),
            presence: presence.clone(),
            broadcaster: broadcaster.clone(),
            typing_debounce: Duration::from_millis(1500),
        });
        Self {
            storage,
            store,
            broadcaster,
            presence,
            coordinator,
            realtime,
        }
    }

    /// 创建会话并把给定用户加为参与者
    pub fn conversation_with(&self, members: &[UserId]) -> ConversationId {
        let id = ConversationId::generate();
        self.storage.add_conversation(Conversation {
            id,
            is_group: members.len() > 2,
            name: None,
        });
        for member in members {
            self.storage.add_participant(*member, id);
        }
        id
    }
}
