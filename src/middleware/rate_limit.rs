//! Sliding-window limiter for login attempts, keyed by client IP.
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct RateLimiter {
    attempts: Arc<RwLock<HashMap<IpAddr, VecDeque<Instant>>>>,
    max_attempts: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: Arc::new(RwLock::new(HashMap::new())),
            max_attempts,
            window,
        }
    }

    /// Records an attempt and reports whether it is within the limit.
    pub async fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut attempts = self.attempts.write().await;
        let history = attempts.entry(ip).or_default();

        while history
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            history.pop_front();
        }

        if history.len() < self.max_attempts {
            history.push_back(now);
            true
        } else {
            false
        }
    }

    /// Drops addresses with no attempts inside the window.
    pub async fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut attempts = self.attempts.write().await;
        attempts.retain(|_, history| {
            history.retain(|t| now.duration_since(*t) < self.window);
            !history.is_empty()
        });
        tracing::debug!("Login limiter cleanup: {} active addresses", attempts.len());
        attempts.len()
    }
}
