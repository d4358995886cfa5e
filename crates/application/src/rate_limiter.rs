use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::ApplicationError;

/// 超过这个数量时顺带清理过期窗口
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: Instant,
    attempts: u32,
}

/// 认证接口限流器（固定窗口）
///
/// 按客户端地址计数，同一窗口内超过 `max_attempts` 次的请求被拒绝，
/// 防止对登录、注册、刷新接口的暴力尝试。
pub struct AuthRateLimiter {
    max_attempts: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl AuthRateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// 记录一次尝试，超限时返回 `RateLimited` 以及距窗口结束的秒数
    pub fn check(&self, client: &str) -> Result<(), ApplicationError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| ApplicationError::infrastructure("rate limiter poisoned"))?;
        let now = Instant::now();

        if windows.len() > PRUNE_THRESHOLD {
            let window = self.window;
            windows.retain(|_, entry| now.duration_since(entry.started_at) < window);
        }

        let entry = windows.entry(client.to_string()).or_insert(Window {
            started_at: now,
            attempts: 0,
        });
        if now.duration_since(entry.started_at) >= self.window {
            *entry = Window {
                started_at: now,
                attempts: 0,
            };
        }

        if entry.attempts >= self.max_attempts {
            let remaining = self.window.saturating_sub(now.duration_since(entry.started_at));
            tracing::warn!(client, attempts = entry.attempts, "认证请求超过限流阈值");
            return Err(ApplicationError::RateLimited {
                retry_after_secs: remaining.as_secs().max(1),
            });
        }

        entry.attempts += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn blocks_after_limit_until_window_resets() {
        let limiter = AuthRateLimiter::new(5, Duration::from_secs(900));
        for _ in 0..5 {
            assert!(limiter.check("10.0.0.1").is_ok());
        }
        let err = limiter.check("10.0.0.1").unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::RateLimited { retry_after_secs: 900 }
        ));

        // 其他客户端不受影响
        assert!(limiter.check("10.0.0.2").is_ok());

        tokio::time::advance(Duration::from_secs(900)).await;
        assert!(limiter.check("10.0.0.1").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_counts_down() {
        let limiter = AuthRateLimiter::new(1, Duration::from_secs(60));
        limiter.check("client").unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;
        match limiter.check("client") {
            Err(ApplicationError::RateLimited { retry_after_secs }) => {
                assert_eq!(retry_after_secs, 15)
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
