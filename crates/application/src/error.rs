use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::{
    broadcaster::BroadcastError, kv_store::StoreError, password::PasswordHasherError,
    token::TokenError,
};

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("password error: {0}")]
    Password(#[from] PasswordHasherError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),
    /// 登录失败，不区分“用户不存在”和“密码错误”
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("no token provided")]
    NoToken,
    #[error("token expired")]
    TokenExpired,
    /// 刷新令牌已被轮换或注销
    #[error("token revoked")]
    TokenRevoked,
    #[error("invalid token")]
    InvalidToken,
    #[error("too many requests, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }

    /// 稳定的机器可读错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::Domain(err) => match err {
                DomainError::InvalidArgument { .. } => "VALIDATION_ERROR",
                DomainError::DuplicateEmail => "DUPLICATE_EMAIL",
                DomainError::DuplicateUsername => "DUPLICATE_USERNAME",
                DomainError::NotParticipant => "NOT_PARTICIPANT",
                DomainError::EmptyContent => "EMPTY_CONTENT",
                DomainError::UserNotFound => "USER_NOT_FOUND",
                DomainError::ConversationNotFound => "CONVERSATION_NOT_FOUND",
            },
            ApplicationError::InvalidCredentials => "INVALID_CREDENTIALS",
            ApplicationError::NoToken => "NO_TOKEN",
            ApplicationError::TokenExpired => "TOKEN_EXPIRED",
            ApplicationError::TokenRevoked => "TOKEN_REVOKED",
            ApplicationError::InvalidToken => "INVALID_TOKEN",
            ApplicationError::RateLimited { .. } => "RATE_LIMITED",
            ApplicationError::Repository(_)
            | ApplicationError::Password(_)
            | ApplicationError::Store(_)
            | ApplicationError::Broadcast(_)
            | ApplicationError::Infrastructure(_) => "INTERNAL_ERROR",
        }
    }

    /// 后端故障（数据库、缓存、广播等），需要记录日志且不能把细节暴露给客户端
    pub fn is_internal(&self) -> bool {
        self.code() == "INTERNAL_ERROR"
    }

    /// 可以安全返回给客户端的描述
    pub fn public_message(&self) -> String {
        match self {
            ApplicationError::Domain(DomainError::InvalidArgument { field, reason }) => {
                format!("{field}: {reason}")
            }
            ApplicationError::Domain(err) => err.to_string(),
            ApplicationError::InvalidCredentials => "Invalid credentials".to_string(),
            ApplicationError::NoToken => "No refresh token".to_string(),
            ApplicationError::TokenExpired => "Token expired".to_string(),
            ApplicationError::TokenRevoked => "Invalid refresh token".to_string(),
            ApplicationError::InvalidToken => "Invalid token".to_string(),
            ApplicationError::RateLimited { .. } => {
                "Too many requests, please try again later".to_string()
            }
            _ => "Internal server error".to_string(),
        }
    }
}

impl From<TokenError> for ApplicationError {
    fn from(value: TokenError) -> Self {
        match value {
            TokenError::InvalidSignature => ApplicationError::InvalidToken,
            TokenError::Expired => ApplicationError::TokenExpired,
            TokenError::Encoding(message) => ApplicationError::Infrastructure(message),
        }
    }
}
