//! JWT 令牌签发与校验
//!
//! access token 与 refresh token 使用不同的密钥签名，并通过 `typ` 声明区分，
//! 任何一种都不能冒充另一种。过期时间由注入的 [`Clock`] 判定。

use std::sync::Arc;

use config::JwtConfig;
use domain::{Timestamp, UserId};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::Duration;
use uuid::Uuid;

use crate::clock::Clock;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("token encoding failed: {0}")]
    Encoding(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    iat: i64,
    exp: i64,
    jti: Uuid,
    typ: TokenKind,
    /// 是否为“记住我”会话，仅 refresh token 使用
    #[serde(default)]
    rem: bool,
}

/// 已签发的令牌，以及传输层设置 cookie 所需的过期信息
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: Timestamp,
    pub ttl: Duration,
}

/// 校验通过的 refresh token 内容
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshClaims {
    pub user_id: UserId,
    pub extended: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub access: Duration,
    pub refresh: Duration,
    pub remember_me: Duration,
}

impl From<&JwtConfig> for TokenLifetimes {
    fn from(config: &JwtConfig) -> Self {
        Self {
            access: Duration::minutes(config.access_ttl_minutes),
            refresh: Duration::days(config.refresh_ttl_days),
            remember_me: Duration::days(config.remember_me_ttl_days),
        }
    }
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

pub struct TokenService {
    access_keys: SigningKeys,
    refresh_keys: SigningKeys,
    lifetimes: TokenLifetimes,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(config: &JwtConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            access_keys: SigningKeys::from_secret(&config.access_secret),
            refresh_keys: SigningKeys::from_secret(&config.refresh_secret),
            lifetimes: TokenLifetimes::from(config),
            clock,
        }
    }

    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    pub fn issue_access_token(&self, user_id: UserId) -> Result<IssuedToken, TokenError> {
        self.issue(user_id, TokenKind::Access, false, self.lifetimes.access)
    }

    /// `extended` 为 true 时使用“记住我”的有效期
    pub fn issue_refresh_token(
        &self,
        user_id: UserId,
        extended: bool,
    ) -> Result<IssuedToken, TokenError> {
        let ttl = if extended {
            self.lifetimes.remember_me
        } else {
            self.lifetimes.refresh
        };
        self.issue(user_id, TokenKind::Refresh, extended, ttl)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<UserId, TokenError> {
        let claims = self.verify(token, TokenKind::Access)?;
        Ok(UserId::from(claims.sub))
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let claims = self.verify(token, TokenKind::Refresh)?;
        Ok(RefreshClaims {
            user_id: UserId::from(claims.sub),
            extended: claims.rem,
        })
    }

    fn issue(
        &self,
        user_id: UserId,
        kind: TokenKind,
        extended: bool,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        let now = self.clock.now();
        let expires_at = now + ttl;
        let claims = Claims {
            sub: user_id.into(),
            iat: now.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
            jti: Uuid::new_v4(),
            typ: kind,
            rem: extended,
        };
        let keys = self.keys(kind);
        let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .map_err(|err| TokenError::Encoding(err.to_string()))?;
        Ok(IssuedToken {
            token,
            expires_at,
            ttl,
        })
    }

    fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // 过期时间用注入的时钟判断
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<Claims>(token, &self.keys(kind).decoding, &validation).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::InvalidSignature,
            },
        )?;
        let claims = data.claims;
        if claims.typ != kind {
            return Err(TokenError::InvalidSignature);
        }
        if claims.exp <= self.clock.now().unix_timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    fn keys(&self, kind: TokenKind) -> &SigningKeys {
        match kind {
            TokenKind::Access => &self.access_keys,
            TokenKind::Refresh => &self.refresh_keys,
        }
    }
}
