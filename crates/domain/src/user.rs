use crate::value_objects::{PasswordHash, Timestamp, UserEmail, UserId, Username};

/// 注册用户。身份字段（id / username / email）创建后不可变，本系统不删除用户。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: Username,
    pub email: UserEmail,
    pub password: PasswordHash,
    pub created_at: Timestamp,
}

impl User {
    pub fn register(
        id: UserId,
        username: Username,
        email: UserEmail,
        password: PasswordHash,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            username,
            email,
            password,
            created_at: now,
        }
    }

    /// 登录标识既可以是用户名也可以是邮箱
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        let identifier = identifier.trim();
        self.username.as_str() == identifier || self.email.as_str() == identifier.to_lowercase()
    }
}
