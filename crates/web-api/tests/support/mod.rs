//! 端到端测试的公共装配：内存存储 + 真实监听端口

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::{
    kv_store::memory::MemoryKeyValueStore, repository::memory::InMemoryStorage, AuthGateway,
    AuthGatewayDependencies, AuthRateLimiter, Clock, ConversationRouter, LocalRoomBroadcaster,
    MessageCache, MessageCoordinator, MessageCoordinatorDependencies, PresenceTracker,
    RealtimeServices, RoomBroadcaster, SystemClock, TokenService,
};
use config::AppConfig;
use domain::{Conversation, ConversationId, UserId};
use infrastructure::BcryptPasswordHasher;
use reqwest::{header::SET_COOKIE, Client, Response};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::oneshot};
use uuid::Uuid;
use web_api::{router, AppState};

pub const PASSWORD: &str = "Passw0rd!";
pub const TYPING_DEBOUNCE: Duration = Duration::from_millis(300);

pub struct TestApp {
    pub addr: SocketAddr,
    pub storage: Arc<InMemoryStorage>,
    pub presence: Arc<PresenceTracker>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={}", self.addr, token)
    }

    /// 带 cookie 存储的客户端，模拟浏览器
    pub fn browser(&self) -> Client {
        Client::builder()
            .cookie_store(true)
            .build()
            .expect("build client")
    }

    pub async fn register(&self, client: &Client, username: &str) -> Value {
        let response = client
            .post(self.url("/api/auth/register"))
            .json(&json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": PASSWORD,
            }))
            .send()
            .await
            .expect("register request");
        assert_eq!(response.status(), 201, "register {username}");
        response.json::<Value>().await.expect("register body")["user"].clone()
    }

    pub async fn access_token(&self, client: &Client) -> String {
        let body = client
            .get(self.url("/api/auth/token"))
            .send()
            .await
            .expect("token request")
            .json::<Value>()
            .await
            .expect("token body");
        body["token"].as_str().expect("token field").to_string()
    }

    pub fn conversation_with(&self, members: &[UserId]) -> ConversationId {
        let id = ConversationId::generate();
        self.storage.add_conversation(Conversation {
            id,
            is_group: members.len() > 2,
            name: Some("test".to_string()),
        });
        for member in members {
            self.storage.add_participant(*member, id);
        }
        id
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub fn user_id(user: &Value) -> UserId {
    let id: Uuid = user["id"]
        .as_str()
        .expect("user id")
        .parse()
        .expect("uuid");
    UserId::from(id)
}

/// 从 Set-Cookie 头中取出指定 cookie 的原始定义
pub fn set_cookie<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with(&format!("{name}=")))
}

pub fn cookie_value(set_cookie: &str) -> String {
    set_cookie
        .split(';')
        .next()
        .and_then(|pair| pair.split_once('='))
        .map(|(_, value)| value.to_string())
        .unwrap_or_default()
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_limit(1_000).await
}

/// 内存后端装配出的应用状态
pub struct TestState {
    pub state: AppState,
    pub storage: Arc<InMemoryStorage>,
    pub presence: Arc<PresenceTracker>,
}

pub fn test_state(auth_max_attempts: u32) -> TestState {
    let config = AppConfig::default();
    let storage = Arc::new(InMemoryStorage::new());
    let store = Arc::new(MemoryKeyValueStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let auth = Arc::new(AuthGateway::new(AuthGatewayDependencies {
        user_repository: storage.clone(),
        credential_store: storage.clone(),
        password_hasher: Arc::new(BcryptPasswordHasher::new(Some(4))),
        token_service: Arc::new(TokenService::new(&config.jwt, clock.clone())),
        clock: clock.clone(),
    }));

    let broadcaster: Arc<dyn RoomBroadcaster> = Arc::new(LocalRoomBroadcaster::new(1024));
    let router_service = Arc::new(ConversationRouter::new(storage.clone()));
    let cache = Arc::new(MessageCache::new(
        store.clone(),
        storage.clone(),
        Duration::from_secs(3600),
    ));
    let coordinator = Arc::new(MessageCoordinator::new(MessageCoordinatorDependencies {
        router: router_service.clone(),
        message_repository: storage.clone(),
        cache,
        broadcaster: broadcaster.clone(),
        clock,
    }));
    let presence = Arc::new(PresenceTracker::new(store, Duration::from_secs(300)));
    let realtime = Arc::new(RealtimeServices {
        router: router_service,
        coordinator,
        presence: presence.clone(),
        broadcaster,
        typing_debounce: TYPING_DEBOUNCE,
    });
    let rate_limiter = Arc::new(AuthRateLimiter::new(
        auth_max_attempts,
        Duration::from_secs(900),
    ));

    TestState {
        state: AppState::new(auth, realtime, rate_limiter, false),
        storage,
        presence,
    }
}

pub async fn spawn_app_with_limit(auth_max_attempts: u32) -> TestApp {
    let TestState {
        state,
        storage,
        presence,
    } = test_state(auth_max_attempts);

    let app = router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
        .ok();
    });

    TestApp {
        addr,
        storage,
        presence,
        shutdown: Some(shutdown_tx),
    }
}
