use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

use crate::models::Id;

/// Sliding window in-memory rate limiter (process local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window { entry.pop_front(); } else { break; }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }

    /// Drops keys whose newest hit is older than `horizon`.
    pub fn sweep(&self, horizon: Duration) {
        let now = Instant::now();
        self.store.retain(|_, hits| hits.back().is_some_and(|t| now.duration_since(*t) < horizon));
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }
}

/// Per-action limits, read from `RL_*` variables.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub thread_limit: usize,
    pub thread_window: Duration,
    pub comment_limit: usize,
    pub comment_window: Duration,
    pub upload_limit: usize,
    pub upload_window: Duration,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: u64) -> Duration { Duration::from_secs(std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)) }
        Self {
            thread_limit: usize_env("RL_THREAD_LIMIT", 5),
            thread_window: dur_env("RL_THREAD_WINDOW", 300),
            comment_limit: usize_env("RL_COMMENT_LIMIT", 20),
            comment_window: dur_env("RL_COMMENT_WINDOW", 60),
            upload_limit: usize_env("RL_UPLOAD_LIMIT", 10),
            upload_window: dur_env("RL_UPLOAD_WINDOW", 3600),
        }
    }
}

/// High level guard used by handlers, keyed by author id.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }

    pub fn from_env() -> Self {
        let enabled = std::env::var("RL_ENABLED").map(|v| v != "0" && !v.eq_ignore_ascii_case("false")).unwrap_or(true);
        Self::new(InMemoryRateLimiter::new(enabled), RateLimitConfig::from_env())
    }

    /// Never limits; handy for tests and local tooling.
    pub fn disabled() -> Self {
        Self::new(InMemoryRateLimiter::new(false), RateLimitConfig::from_env())
    }

    /// Forgets users idle for longer than the widest window.
    pub fn sweep(&self) {
        let horizon = self.cfg.thread_window.max(self.cfg.comment_window).max(self.cfg.upload_window);
        self.limiter.sweep(horizon);
    }

    pub fn allow_thread(&self, user: Id) -> bool { self.limiter.check(&format!("thread:{user}"), self.cfg.thread_limit, self.cfg.thread_window) }
    pub fn allow_comment(&self, user: Id) -> bool { self.limiter.check(&format!("comment:{user}"), self.cfg.comment_limit, self.cfg.comment_window) }
    pub fn allow_upload(&self, user: Id) -> bool { self.limiter.check(&format!("upload:{user}"), self.cfg.upload_limit, self.cfg.upload_window) }
}
