//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：认证与令牌轮换、在线状态、
//! 会话路由、消息投递与缓存、输入状态通知，以及每个实时连接的 actor。
//! 外部依赖（数据库、键值存储、密码哈希、广播）都以 trait 形式注入。

pub mod broadcaster;
pub mod clock;
pub mod dto;
pub mod error;
pub mod events;
pub mod kv_store;
pub mod local_broadcast;
pub mod message_cache;
pub mod password;
pub mod presence;
pub mod rate_limiter;
pub mod realtime;
pub mod repository;
pub mod services;
pub mod token;

pub use broadcaster::{BroadcastError, ConnectionId, RoomBroadcast, RoomBroadcaster};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dto::{ConversationDto, UserDto};
pub use error::ApplicationError;
pub use events::{AckError, ClientCommand, ServerEvent};
pub use kv_store::{KeyValueStore, StoreError};
pub use local_broadcast::LocalRoomBroadcaster;
pub use message_cache::MessageCache;
pub use password::{PasswordHasher, PasswordHasherError};
pub use presence::PresenceTracker;
pub use rate_limiter::AuthRateLimiter;
pub use realtime::{ConnectionActor, RealtimeServices};
pub use repository::{CredentialStore, MessageRepository, ParticipantRepository, UserRepository};
pub use services::{
    AuthGateway, AuthGatewayDependencies, AuthSession, AuthTokens, ConversationRouter,
    LoginRequest, MessageCoordinator, MessageCoordinatorDependencies, RegisterRequest,
    TypingNotifier,
};
pub use token::{IssuedToken, RefreshClaims, TokenError, TokenService};
