use crate::value_objects::{RefreshTokenId, Timestamp, UserId};

/// 持久化的刷新令牌记录
/// 对应数据库表：refresh_tokens
///
/// 每个活跃会话恰好一行；登录/注册/刷新时创建，登出时删除，
/// 刷新时在同一个原子单元内先删后建。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub id: RefreshTokenId,
    pub user_id: UserId,
    /// 不透明的令牌字符串（唯一）
    pub token: String,
    pub expires_at: Timestamp,
}

impl RefreshToken {
    pub fn new(user_id: UserId, token: impl Into<String>, expires_at: Timestamp) -> Self {
        Self {
            id: RefreshTokenId::generate(),
            user_id,
            token: token.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}
