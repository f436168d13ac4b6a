//! Sliding-window rate limiter keyed by client address.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::AuthError;

/// Allows at most `limit` hits per `window` for each client.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    hits: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a hit for `client`, or fail if it already used its budget.
    /// Rejected hits are not recorded.
    pub async fn check(&self, client: IpAddr) -> Result<(), AuthError> {
        let now = Instant::now();
        let mut hits = self.hits.lock().await;

        // Drop clients whose whole history has aged out.
        hits.retain(|_, times| {
            times
                .back()
                .is_some_and(|last| now.duration_since(*last) < self.window)
        });

        let times = hits.entry(client).or_default();
        while let Some(first) = times.front() {
            if now.duration_since(*first) >= self.window {
                times.pop_front();
            } else {
                break;
            }
        }

        if times.len() >= self.limit {
            tracing::warn!(%client, limit = self.limit, "Auth rate limit exceeded");
            return Err(AuthError::RateLimited {
                window_secs: self.window.as_secs(),
            });
        }
        times.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn allows_up_to_limit() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        for _ in 0..5 {
            limiter.check(CLIENT).await.unwrap();
        }
        let err = limiter.check(CLIENT).await.unwrap_err();
        assert_eq!(err.to_string(), "Rate limit exceeded. Try again in 60 seconds.");
    }

    #[tokio::test]
    async fn clients_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        limiter.check(CLIENT).await.unwrap();
        limiter
            .check(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)))
            .await
            .unwrap();
        assert!(limiter.check(CLIENT).await.is_err());
    }

    #[tokio::test]
    async fn window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_millis(400));
        limiter.check(CLIENT).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        limiter.check(CLIENT).await.unwrap();
        assert!(limiter.check(CLIENT).await.is_err());

        // The first hit ages out; the second is still inside the window.
        tokio::time::sleep(Duration::from_millis(250)).await;
        limiter.check(CLIENT).await.unwrap();
        assert!(limiter.check(CLIENT).await.is_err());
    }
}
