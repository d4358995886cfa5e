use std::net::SocketAddr;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use application::{ConversationDto, LoginRequest, RegisterRequest};
use domain::{ConversationId, Message};

use crate::{
    auth::{self, AuthUser},
    error::ApiError,
    state::AppState,
    ws_connection,
};

#[derive(Debug, Deserialize, Validate)]
struct RegisterPayload {
    #[validate(length(min = 1, max = 50, message = "must be between 1 and 50 characters"))]
    username: String,
    #[validate(email(message = "invalid email address"))]
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginPayload {
    #[serde(alias = "email", alias = "username")]
    identifier: String,
    password: String,
    #[serde(default)]
    remember_me: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api", api_routes(state.clone()))
        .with_state(state)
}

fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .nest("/auth", auth_routes(state))
        .route("/users/online", get(online_users))
        .route("/conversations", get(list_conversations))
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversation_messages),
        )
        // 旧版客户端使用的路径
        .route("/users/online-users", get(online_users))
        .route("/messages/{conversation_id}", get(conversation_messages))
}

fn auth_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        // 以上三个接口限流
        .route_layer(middleware::from_fn_with_state(state, auth_rate_limit))
        .route("/logout", post(logout))
        .route("/token", get(access_token))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// 代理后面取 x-forwarded-for 的第一个地址，否则用对端地址
fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn auth_rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = client_key(request.headers(), peer);
    match state.rate_limiter.check(&client) {
        Ok(()) => next.run(request).await,
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, CookieJar, Json<Value>), ApiError> {
    if let Err(errors) = payload.validate() {
        let detail = errors
            .field_errors()
            .into_iter()
            .next()
            .map(|(field, issues)| {
                let reason = issues
                    .first()
                    .and_then(|issue| issue.message.as_ref())
                    .map(|message| message.to_string())
                    .unwrap_or_else(|| "invalid".to_string());
                format!("{field}: {reason}")
            })
            .unwrap_or_else(|| "invalid input".to_string());
        return Err(ApiError::bad_request("VALIDATION_ERROR", detail));
    }

    let session = state
        .auth
        .register(RegisterRequest {
            username: payload.username,
            email: payload.email,
            password: payload.password,
        })
        .await?;

    let jar = auth::set_credentials(jar, &session.tokens, state.secure_cookies);
    Ok((StatusCode::CREATED, jar, Json(json!({ "user": session.user }))))
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginPayload>,
) -> Result<(CookieJar, Json<Value>), ApiError> {
    let session = state
        .auth
        .login(LoginRequest {
            identifier: payload.identifier,
            password: payload.password,
            remember_me: payload.remember_me,
        })
        .await?;

    let jar = auth::set_credentials(jar, &session.tokens, state.secure_cookies);
    Ok((jar, Json(json!({ "user": session.user }))))
}

async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(StatusCode, CookieJar, Json<Value>), ApiError> {
    let presented = auth::refresh_token(&jar);
    let tokens = state.auth.refresh(presented.as_deref()).await?;

    let jar = auth::set_credentials(jar, &tokens, state.secure_cookies);
    Ok((
        StatusCode::CREATED,
        jar,
        Json(json!({ "message": "Token refreshed" })),
    ))
}

/// 无论服务端是否找到对应记录，都清除客户端凭证
async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Json<Value>) {
    let presented = auth::refresh_token(&jar);
    if let Err(err) = state.auth.logout(presented.as_deref()).await {
        tracing::error!(error = %err, "删除刷新令牌失败");
    }
    (
        auth::clear_credentials(jar),
        Json(json!({ "message": "Logged out" })),
    )
}

async fn access_token(user: AuthUser) -> Json<Value> {
    Json(json!({ "token": user.token }))
}

async fn online_users(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let online: Vec<Uuid> = state
        .realtime
        .presence
        .list_online_users()
        .await?
        .into_iter()
        .map(Uuid::from)
        .collect();
    Ok(Json(json!({ "onlineUsers": online })))
}

async fn list_conversations(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<ConversationDto>>, ApiError> {
    let conversations = state
        .realtime
        .router
        .conversations_for(user.user_id())
        .await?;
    Ok(Json(
        conversations.iter().map(ConversationDto::from).collect(),
    ))
}

async fn conversation_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = state
        .realtime
        .coordinator
        .get_messages(user.user_id(), ConversationId::from(conversation_id))
        .await?;
    Ok(Json(messages))
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    user: AuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = user.user_id();
    ws.on_upgrade(move |socket| ws_connection::serve(socket, state, user_id))
}
