//! 领域模型错误定义
//!
//! 定义了核心业务可能出现的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 输入校验失败，携带字段信息
    #[error("validation failed: {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("email already registered")]
    DuplicateEmail,

    #[error("username already taken")]
    DuplicateUsername,

    /// 发送者不是该会话的参与者
    #[error("user is not a participant of the conversation")]
    NotParticipant,

    /// 去掉首尾空白后消息为空
    #[error("message content is empty")]
    EmptyContent,

    #[error("user not found")]
    UserNotFound,

    #[error("conversation not found")]
    ConversationNotFound,
}

impl DomainError {
    /// 创建参数校验错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 仓储层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    /// 唯一约束冲突，`constraint` 为触发冲突的约束名（若可得）
    #[error("unique constraint violated: {constraint:?}")]
    Conflict { constraint: Option<String> },

    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn conflict(constraint: Option<impl Into<String>>) -> Self {
        Self::Conflict {
            constraint: constraint.map(Into::into),
        }
    }
}
