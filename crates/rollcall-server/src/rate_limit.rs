//! Sliding-window limiter for PIN lookups
//!
//! PINs have a small keyspace, so resolution endpoints are limited per
//! caller to keep guessing impractical.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rollcall_core::{Error, Result};
use tracing::warn;

pub struct RateLimiter {
    limit: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit as usize,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a hit for `key`, failing with `RateLimited` over the limit
    pub fn check(&self, key: &str) -> Result<()> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<()> {
        let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());

        // Forget callers that have been quiet for a full window
        hits.retain(|_, q| q.back().is_some_and(|last| now.duration_since(*last) < self.window));

        let queue = hits.entry(key.to_string()).or_default();
        while queue
            .front()
            .is_some_and(|first| now.duration_since(*first) >= self.window)
        {
            queue.pop_front();
        }

        if queue.len() >= self.limit {
            warn!(key, "PIN lookup rate limit exceeded");
            return Err(Error::RateLimited);
        }
        queue.push_back(now);
        Ok(())
    }
}
