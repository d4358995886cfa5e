use std::sync::Arc;

use domain::{
    check_password_policy, DomainError, RefreshToken, RepositoryError, User, UserEmail, UserId,
    Username,
};

use crate::{
    clock::Clock,
    dto::UserDto,
    error::ApplicationError,
    password::PasswordHasher,
    repository::{
        CredentialStore, UserRepository, USERS_EMAIL_CONSTRAINT, USERS_USERNAME_CONSTRAINT,
    },
    token::{IssuedToken, TokenError, TokenService},
};

#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    /// 用户名或邮箱
    pub identifier: String,
    pub password: String,
    pub remember_me: bool,
}

/// 一次签发的 access/refresh 令牌对
#[derive(Debug, Clone)]
pub struct AuthTokens {
    pub user_id: UserId,
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: UserDto,
    pub tokens: AuthTokens,
}

pub struct AuthGatewayDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub credential_store: Arc<dyn CredentialStore>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub token_service: Arc<TokenService>,
    pub clock: Arc<dyn Clock>,
}

/// 注册、登录、刷新、登出
pub struct AuthGateway {
    deps: AuthGatewayDependencies,
}

impl AuthGateway {
    pub fn new(deps: AuthGatewayDependencies) -> Self {
        Self { deps }
    }

    pub fn token_service(&self) -> &TokenService {
        &self.deps.token_service
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<AuthSession, ApplicationError> {
        let username = Username::parse(request.username)?;
        let email = UserEmail::parse(request.email)?;
        check_password_policy(&request.password)?;

        if self
            .deps
            .user_repository
            .find_by_email(&email)
            .await?
            .is_some()
        {
            return Err(DomainError::DuplicateEmail.into());
        }
        if self
            .deps
            .user_repository
            .find_by_username(&username)
            .await?
            .is_some()
        {
            return Err(DomainError::DuplicateUsername.into());
        }

        let password_hash = self.deps.password_hasher.hash(&request.password).await?;
        let user = User::register(
            UserId::generate(),
            username,
            email,
            password_hash,
            self.deps.clock.now(),
        );

        let tokens = self.issue_tokens(user.id, false)?;
        let record = Self::refresh_record(&tokens);
        // 预检查和插入之间仍可能有并发注册，唯一约束兜底
        let user = self
            .deps
            .user_repository
            .create_with_refresh_token(user, record)
            .await
            .map_err(map_registration_conflict)?;

        tracing::info!(user_id = %user.id, username = %user.username, "用户注册成功");
        Ok(AuthSession {
            user: UserDto::from(&user),
            tokens,
        })
    }

    pub async fn login(&self, request: LoginRequest) -> Result<AuthSession, ApplicationError> {
        let user = self
            .deps
            .user_repository
            .find_by_identifier(&request.identifier)
            .await?
            .ok_or(ApplicationError::InvalidCredentials)?;

        let password_ok = self
            .deps
            .password_hasher
            .verify(&request.password, &user.password)
            .await?;
        if !password_ok {
            tracing::info!(user_id = %user.id, "登录失败：密码错误");
            return Err(ApplicationError::InvalidCredentials);
        }

        let tokens = self.issue_tokens(user.id, request.remember_me)?;
        // 单会话策略：新登录使该用户此前的刷新令牌全部失效
        self.deps
            .credential_store
            .replace_for_user(Self::refresh_record(&tokens))
            .await?;

        tracing::info!(user_id = %user.id, remember_me = request.remember_me, "用户登录成功");
        Ok(AuthSession {
            user: UserDto::from(&user),
            tokens,
        })
    }

    /// 刷新令牌轮换，每个刷新令牌至多兑换一次
    pub async fn refresh(&self, presented: Option<&str>) -> Result<AuthTokens, ApplicationError> {
        let presented = presented
            .filter(|token| !token.is_empty())
            .ok_or(ApplicationError::NoToken)?;

        let claims = match self.deps.token_service.verify_refresh_token(presented) {
            Ok(claims) => claims,
            Err(TokenError::Expired) => {
                self.deps.credential_store.delete_by_token(presented).await?;
                return Err(ApplicationError::TokenExpired);
            }
            Err(err) => return Err(err.into()),
        };

        if self
            .deps
            .user_repository
            .find_by_id(claims.user_id)
            .await?
            .is_none()
        {
            self.deps.credential_store.delete_by_token(presented).await?;
            return Err(ApplicationError::TokenRevoked);
        }

        let tokens = self.issue_tokens(claims.user_id, claims.extended)?;
        let rotated = self
            .deps
            .credential_store
            .rotate(presented, Self::refresh_record(&tokens))
            .await?;
        if !rotated {
            // 令牌已被轮换过或已登出，视为重放
            self.deps.credential_store.delete_by_token(presented).await?;
            tracing::warn!(user_id = %claims.user_id, "拒绝已失效的刷新令牌");
            return Err(ApplicationError::TokenRevoked);
        }

        tracing::info!(user_id = %claims.user_id, "刷新令牌已轮换");
        Ok(tokens)
    }

    /// 幂等：令牌不存在或未提供时同样成功
    pub async fn logout(&self, presented: Option<&str>) -> Result<(), ApplicationError> {
        let Some(token) = presented.filter(|token| !token.is_empty()) else {
            return Ok(());
        };
        let deleted = self.deps.credential_store.delete_by_token(token).await?;
        tracing::info!(revoked = deleted, "用户登出");
        Ok(())
    }

    /// 校验 access token，返回其中的用户
    pub async fn authenticate(&self, access_token: &str) -> Result<UserDto, ApplicationError> {
        let user_id = self.deps.token_service.verify_access_token(access_token)?;
        let user = self
            .deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or(ApplicationError::InvalidToken)?;
        Ok(UserDto::from(&user))
    }

    fn issue_tokens(&self, user_id: UserId, extended: bool) -> Result<AuthTokens, ApplicationError> {
        let tokens = &self.deps.token_service;
        Ok(AuthTokens {
            user_id,
            access: tokens.issue_access_token(user_id)?,
            refresh: tokens.issue_refresh_token(user_id, extended)?,
        })
    }

    fn refresh_record(tokens: &AuthTokens) -> RefreshToken {
        RefreshToken::new(
            tokens.user_id,
            tokens.refresh.token.clone(),
            tokens.refresh.expires_at,
        )
    }
}

fn map_registration_conflict(err: RepositoryError) -> ApplicationError {
    match &err {
        RepositoryError::Conflict {
            constraint: Some(name),
        } if name == USERS_EMAIL_CONSTRAINT => DomainError::DuplicateEmail.into(),
        RepositoryError::Conflict {
            constraint: Some(name),
        } if name == USERS_USERNAME_CONSTRAINT => DomainError::DuplicateUsername.into(),
        _ => err.into(),
    }
}
