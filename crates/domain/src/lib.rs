//! 聊天核心领域模型
//!
//! 包含用户、会话（conversation）、参与者、消息、刷新令牌等实体，
//! 以及值对象和错误定义。本层不做任何 I/O。

pub mod conversation;
pub mod errors;
pub mod message;
pub mod presence;
pub mod refresh_token;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use conversation::{Conversation, Participant};
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use message::{DeliveryStatus, Message};
pub use presence::PresenceStatus;
pub use refresh_token::RefreshToken;
pub use user::User;
pub use value_objects::{
    check_password_policy, ConversationId, MessageContent, MessageId, PasswordHash,
    RefreshTokenId, Timestamp, UserEmail, UserId, Username,
};
