//! 凭证传输与请求认证
//!
//! access/refresh 令牌以 HttpOnly、SameSite=Strict 的 cookie 下发；
//! 受保护接口依次从 cookie、`Authorization: Bearer` 头、`?token=` 查询参数中取 access 令牌。

use application::{AuthTokens, IssuedToken, UserDto};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use domain::UserId;

use crate::{error::ApiError, state::AppState};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

fn credential_cookie(name: &'static str, issued: &IssuedToken, secure: bool) -> Cookie<'static> {
    Cookie::build((name, issued.token.clone()))
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(secure)
        .path("/")
        .max_age(issued.ttl)
        .build()
}

/// 写入一对新签发的凭证，max-age 与令牌有效期一致
pub fn set_credentials(jar: CookieJar, tokens: &AuthTokens, secure: bool) -> CookieJar {
    jar.add(credential_cookie(ACCESS_COOKIE, &tokens.access, secure))
        .add(credential_cookie(REFRESH_COOKIE, &tokens.refresh, secure))
}

pub fn clear_credentials(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path("/"))
}

pub fn refresh_token(jar: &CookieJar) -> Option<String> {
    jar.get(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_owned())
        .filter(|value| !value.is_empty())
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_owned())
}

fn query_token(parts: &Parts) -> Option<String> {
    parts.uri.query()?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "token").then(|| value.to_owned())
    })
}

fn access_token(parts: &Parts) -> Option<String> {
    CookieJar::from_headers(&parts.headers)
        .get(ACCESS_COOKIE)
        .map(|cookie| cookie.value().to_owned())
        .or_else(|| bearer_token(parts))
        .or_else(|| query_token(parts))
        .filter(|token| !token.is_empty())
}

/// 已通过 access 令牌认证的调用方
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: UserDto,
    pub token: String,
}

impl AuthUser {
    pub fn user_id(&self) -> UserId {
        UserId::from(self.user.id)
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let token =
            access_token(parts).ok_or_else(|| ApiError::unauthorized("Missing access token"))?;
        let user = state
            .auth
            .authenticate(&token)
            .await
            .map_err(ApiError::unauthenticated)?;
        Ok(AuthUser { user, token })
    }
}
