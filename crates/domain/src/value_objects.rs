use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;
use validator::ValidateEmail;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = OffsetDateTime;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            /// 生成新的随机标识
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

uuid_id!(
    /// 用户唯一标识。
    UserId
);
uuid_id!(
    /// 会话（房间）唯一标识。
    ConversationId
);
uuid_id!(
    /// 消息唯一标识。
    MessageId
);
uuid_id!(
    /// 刷新令牌记录标识。
    RefreshTokenId
);

/// 经过验证的用户名。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Username(String);

impl Username {
    pub const MAX_LEN: usize = 50;

    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::invalid_argument("username", "cannot be empty"));
        }
        if value.chars().count() > Self::MAX_LEN {
            return Err(DomainError::invalid_argument("username", "too long"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 经过验证并规范化（去空白、小写）的邮箱。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserEmail(String);

impl UserEmail {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_lowercase();
        if !value.validate_email() {
            return Err(DomainError::invalid_argument("email", "invalid email address"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 密码哈希（只保存慢速加盐哈希的结果，从不保存明文）。
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::invalid_argument("password_hash", "cannot be empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(***)")
    }
}

/// 注册密码强度规则：至少 8 位，必须同时包含字母、数字和 `@$!%*#?&` 中的一个符号，
/// 且只能由这些字符组成。
pub fn check_password_policy(plaintext: &str) -> Result<(), DomainError> {
    const SYMBOLS: &str = "@$!%*#?&";
    const MESSAGE: &str =
        "must be at least 8 characters long and include letters, numbers, and a special character";

    let allowed = plaintext
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || SYMBOLS.contains(c));
    let has_letter = plaintext.chars().any(|c| c.is_ascii_alphabetic());
    let has_digit = plaintext.chars().any(|c| c.is_ascii_digit());
    let has_symbol = plaintext.chars().any(|c| SYMBOLS.contains(c));

    if plaintext.len() < 8 || !allowed || !has_letter || !has_digit || !has_symbol {
        return Err(DomainError::invalid_argument("password", MESSAGE));
    }
    Ok(())
}

/// 消息正文，构造时去除首尾空白。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageContent(String);

impl MessageContent {
    pub const MAX_LEN: usize = 4000;

    pub fn parse(value: impl AsRef<str>) -> Result<Self, DomainError> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(DomainError::EmptyContent);
        }
        if trimmed.chars().count() > Self::MAX_LEN {
            return Err(DomainError::invalid_argument("content", "too long"));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_normalized() {
        let email = UserEmail::parse("  Alice@X.com ").unwrap();
        assert_eq!(email.as_str(), "alice@x.com");
        assert!(UserEmail::parse("not-an-email").is_err());
    }

    #[test]
    fn password_policy() {
        assert!(check_password_policy("Passw0rd!").is_ok());
        assert!(check_password_policy("short1!").is_err());
        assert!(check_password_policy("NoDigits!!").is_err());
        assert!(check_password_policy("NoSymbol123").is_err());
        // 空格不在允许字符集内
        assert!(check_password_policy("Pass w0rd!").is_err());
    }

    #[test]
    fn content_is_trimmed() {
        let content = MessageContent::parse("  hi  ").unwrap();
        assert_eq!(content.as_str(), "hi");
        assert_eq!(MessageContent::parse(" \n\t "), Err(DomainError::EmptyContent));
    }

    #[test]
    fn username_rejects_blank() {
        assert!(Username::parse("   ").is_err());
        assert_eq!(Username::parse(" alice ").unwrap().as_str(), "alice");
    }
}
