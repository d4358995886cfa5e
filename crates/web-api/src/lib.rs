//! Web API 层。
//!
//! 提供 Axum 路由：认证接口通过 cookie 下发凭证，`/ws` 升级为实时连接，
//! 请求都委托给应用层的用例服务。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{AuthUser, ACCESS_COOKIE, REFRESH_COOKIE};
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
