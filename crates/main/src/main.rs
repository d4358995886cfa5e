//! 主应用程序入口
//!
//! 加载配置、连接 Postgres 与 Redis、装配应用层服务并启动 Axum 服务。

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use application::{
    AuthGateway, AuthGatewayDependencies, AuthRateLimiter, Clock, ConversationRouter,
    LocalRoomBroadcaster, MessageCache, MessageCoordinator, MessageCoordinatorDependencies,
    PresenceTracker, RealtimeServices, RoomBroadcaster, SystemClock, TokenService,
};
use axum::http::{header, HeaderValue, Method};
use config::AppConfig;
use infrastructure::Infrastructure;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    tracing::info!(config = %config.sanitized(), "配置已加载");

    let infra = Infrastructure::connect(&config)
        .await
        .context("连接外部依赖失败")?;

    let state = build_state(&config, &infra);
    let mut app = router(state).layer(TraceLayer::new_for_http());
    if let Some(cors) = cors_layer(&config)? {
        app = app.layer(cors);
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("无效的监听地址")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("聊天服务器启动在 http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("服务器已停止");
    Ok(())
}

fn build_state(config: &AppConfig, infra: &Infrastructure) -> AppState {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let realtime_config = &config.realtime;

    let auth = Arc::new(AuthGateway::new(AuthGatewayDependencies {
        user_repository: infra.user_repository(),
        credential_store: infra.credential_store(),
        password_hasher: infra.password_hasher(),
        token_service: Arc::new(TokenService::new(&config.jwt, clock.clone())),
        clock: clock.clone(),
    }));

    let broadcaster: Arc<dyn RoomBroadcaster> =
        Arc::new(LocalRoomBroadcaster::new(realtime_config.broadcast_capacity));
    let conversation_router = Arc::new(ConversationRouter::new(infra.participant_repository()));
    let cache = Arc::new(MessageCache::new(
        infra.key_value_store(),
        infra.message_repository(),
        Duration::from_secs(realtime_config.message_cache_ttl_seconds),
    ));
    let coordinator = Arc::new(MessageCoordinator::new(MessageCoordinatorDependencies {
        router: conversation_router.clone(),
        message_repository: infra.message_repository(),
        cache,
        broadcaster: broadcaster.clone(),
        clock,
    }));
    let presence = Arc::new(PresenceTracker::new(
        infra.key_value_store(),
        Duration::from_secs(realtime_config.presence_ttl_seconds),
    ));
    let realtime = Arc::new(RealtimeServices {
        router: conversation_router,
        coordinator,
        presence,
        broadcaster,
        typing_debounce: Duration::from_millis(realtime_config.typing_debounce_millis),
    });

    let rate_limiter = Arc::new(AuthRateLimiter::new(
        config.rate_limit.auth_max_attempts,
        Duration::from_secs(config.rate_limit.auth_window_seconds),
    ));

    AppState::new(auth, realtime, rate_limiter, config.server.secure_cookies)
}

/// 前端与 API 不同源时允许携带凭证的跨域请求
fn cors_layer(config: &AppConfig) -> anyhow::Result<Option<CorsLayer>> {
    let Some(origin) = config.server.client_origin.as_deref() else {
        return Ok(None);
    };
    let origin = HeaderValue::from_str(origin).context("无效的 CLIENT_URL")?;
    Ok(Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
    ))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "监听关闭信号失败");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到关闭信号，开始优雅停机");
}
