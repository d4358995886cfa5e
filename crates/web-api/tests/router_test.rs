//! 不经过网络，直接用 `oneshot` 驱动路由

mod support;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use tower::ServiceExt;
use web_api::router;

use support::test_state;

#[tokio::test]
async fn health_is_public() {
    let app = router(test_state(10).state);
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_routes_reject_missing_or_bad_tokens() {
    let app = router(test_state(10).state);
    for uri in ["/api/auth/token", "/api/users/online", "/api/conversations", "/ws"] {
        let response = app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }

    let response = app
        .oneshot(
            Request::get("/api/conversations")
                .header(header::AUTHORIZATION, "Bearer not-a-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_login_body_is_client_error() {
    let app = router(test_state(10).state);
    let response = app
        .oneshot(
            Request::post("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"password": 1}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn rate_limit_without_peer_address_uses_forwarded_header() {
    let app = router(test_state(1).state);
    let login = |client: &'static str| {
        Request::post("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", client)
            .body(Body::from(r#"{"identifier":"ghost","password":"Wr0ngPass!"}"#))
            .unwrap()
    };

    let first = app.clone().oneshot(login("198.51.100.1")).await.unwrap();
    assert_eq!(first.status(), StatusCode::UNAUTHORIZED);
    let second = app.clone().oneshot(login("198.51.100.1")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let other = app.oneshot(login("198.51.100.2")).await.unwrap();
    assert_eq!(other.status(), StatusCode::UNAUTHORIZED);
}
