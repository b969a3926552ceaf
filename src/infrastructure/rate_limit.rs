//! Fixed-window rate limiting

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use crate::ports::{RateDecision, RateLimiter, StoreError};

/// Start of the window containing `now`, aligned to the epoch.
pub fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let len = i64::try_from(window.as_secs().max(1)).unwrap_or(i64::MAX);
    let secs = now.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(len), 0).unwrap_or(now)
}

pub(crate) fn decide(hits: u32, limit: u32, start: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> RateDecision {
    if hits <= limit {
        return RateDecision::Allowed { remaining: limit - hits };
    }
    let elapsed = u64::try_from((now - start).num_seconds()).unwrap_or(0);
    RateDecision::Limited { retry_after_secs: window.as_secs().saturating_sub(elapsed).max(1) }
}

/// Per-process limiter. Counts reset when the process restarts.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    counters: Mutex<HashMap<String, (DateTime<Utc>, u32)>>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window, counters: Mutex::new(HashMap::new()) }
    }

    pub async fn hit_at(&self, key: &str, now: DateTime<Utc>) -> RateDecision {
        let start = window_start(now, self.window);
        let mut counters = self.counters.lock().await;
        counters.retain(|_, (window, _)| *window >= start);
        let entry = counters.entry(key.to_string()).or_insert((start, 0));
        entry.1 = entry.1.saturating_add(1);
        decide(entry.1, self.limit, start, self.window, now)
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn hit(&self, key: &str) -> Result<RateDecision, StoreError> {
        Ok(self.hit_at(key, Utc::now()).await)
    }
}
