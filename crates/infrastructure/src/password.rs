use application::{PasswordHasher, PasswordHasherError};
use async_trait::async_trait;
use bcrypt::{hash, verify, DEFAULT_COST};
use domain::PasswordHash;

/// bcrypt 实现，计算放在阻塞线程池里执行
#[derive(Clone)]
pub struct BcryptPasswordHasher {
    cost: u32,
}

impl BcryptPasswordHasher {
    pub fn new(cost: Option<u32>) -> Self {
        Self {
            cost: cost.unwrap_or(DEFAULT_COST),
        }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

#[async_trait]
impl PasswordHasher for BcryptPasswordHasher {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
        let cost = self.cost;
        let plaintext = plaintext.to_owned();
        let hashed = tokio::task::spawn_blocking(move || hash(plaintext, cost))
            .await
            .map_err(|err| PasswordHasherError::new(err.to_string()))
            .and_then(|res| res.map_err(|err| PasswordHasherError::new(err.to_string())))?;

        PasswordHash::new(hashed).map_err(|err| PasswordHasherError::new(err.to_string()))
    }

    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError> {
        let plaintext = plaintext.to_owned();
        let hashed = hashed.as_str().to_owned();
        tokio::task::spawn_blocking(move || verify(plaintext, &hashed))
            .await
            .map_err(|err| PasswordHasherError::new(err.to_string()))
            .and_then(|res| res.map_err(|err| PasswordHasherError::new(err.to_string())))
    }
}

impl Default for BcryptPasswordHasher {
    fn default() -> Self {
        Self::new(Some(DEFAULT_COST))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_then_verify() {
        let hasher = BcryptPasswordHasher::new(Some(4));
        let hashed = hasher.hash("Passw0rd!").await.unwrap();
        assert_ne!(hashed.as_str(), "Passw0rd!");
        assert!(hasher.verify("Passw0rd!", &hashed).await.unwrap());
        assert!(!hasher.verify("wrong-pass1!", &hashed).await.unwrap());
    }

    #[tokio::test]
    async fn same_password_gets_different_salt() {
        let hasher = BcryptPasswordHasher::new(Some(4));
        let first = hasher.hash("Passw0rd!").await.unwrap();
        let second = hasher.hash("Passw0rd!").await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn malformed_hash_is_an_error() {
        let hasher = BcryptPasswordHasher::new(Some(4));
        let bogus = PasswordHash::new("not-a-bcrypt-hash").unwrap();
        assert!(hasher.verify("Passw0rd!", &bogus).await.is_err());
    }
}
