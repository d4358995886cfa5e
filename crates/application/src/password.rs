use async_trait::async_trait;
use domain::PasswordHash;
use thiserror::Error;

/// 哈希计算失败（如 bcrypt 参数非法、阻塞任务被取消）。密码不匹配不是错误。
#[derive(Debug, Error)]
#[error("password hashing failed: {0}")]
pub struct PasswordHasherError(pub String);

impl PasswordHasherError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// 慢速、加盐的单向哈希。实现方负责把 CPU 密集的计算移出异步执行器。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError>;

    /// 返回 `Ok(false)` 表示密码不匹配
    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError>;
}
