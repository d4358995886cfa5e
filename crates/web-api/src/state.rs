use std::sync::Arc;

use application::{AuthGateway, AuthRateLimiter, RealtimeServices};

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthGateway>,
    pub realtime: Arc<RealtimeServices>,
    pub rate_limiter: Arc<AuthRateLimiter>,
    /// 生产环境下凭证 cookie 只走 HTTPS
    pub secure_cookies: bool,
}

impl AppState {
    pub fn new(
        auth: Arc<AuthGateway>,
        realtime: Arc<RealtimeServices>,
        rate_limiter: Arc<AuthRateLimiter>,
        secure_cookies: bool,
    ) -> Self {
        Self {
            auth,
            realtime,
            rate_limiter,
            secure_cookies,
        }
    }
}
