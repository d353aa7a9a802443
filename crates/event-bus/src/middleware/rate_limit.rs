//! Sliding-window rate limiting, per source or global.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use super::{DropReason, Middleware, Next, Outcome};
use crate::error::HandlerError;
use crate::event::Event;

const GLOBAL_KEY: &str = "global";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Events allowed per window.
    pub max_events: usize,
    pub time_window: Duration,
    /// Keep one window per event source instead of a single shared one.
    pub per_source: bool,
}

impl RateLimitConfig {
    pub fn per_source(max_events: usize, time_window: Duration) -> Self {
        Self {
            max_events,
            time_window,
            per_source: true,
        }
    }

    pub fn global(max_events: usize, time_window: Duration) -> Self {
        Self {
            max_events,
            time_window,
            per_source: false,
        }
    }
}

#[derive(Debug, Default)]
struct Windows {
    by_key: HashMap<String, VecDeque<Instant>>,
    last_sweep: Option<Instant>,
}

impl Windows {
    /// Forget keys with no admission inside the window. Runs at most once per window.
    fn sweep(&mut self, now: Instant, time_window: Duration) {
        if self
            .last_sweep
            .is_some_and(|at| now.duration_since(at) < time_window)
        {
            return;
        }
        self.last_sweep = Some(now);
        self.by_key.retain(|_, window| {
            window
                .back()
                .is_some_and(|ts| now.duration_since(*ts) < time_window)
        });
    }
}

/// Drops events once `max_events` have passed within `time_window`.
///
/// Dropped events never reach `next` and do not occupy the window. Idle
/// sources are forgotten once their window has fully elapsed.
#[derive(Debug)]
pub struct RateLimitMiddleware {
    config: RateLimitConfig,
    windows: Mutex<Windows>,
    dropped: AtomicU64,
}

impl RateLimitMiddleware {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(Windows::default()),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Events dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Keys currently holding a window.
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().by_key.len()
    }

    fn key<'a>(&self, event: &'a Event) -> &'a str {
        if self.config.per_source {
            event.source()
        } else {
            GLOBAL_KEY
        }
    }

    /// Record an admission, or return the current count if the window is full.
    fn admit(&self, key: &str, now: Instant) -> Result<(), usize> {
        let mut windows = self.windows.lock();
        windows.sweep(now, self.config.time_window);
        let window = windows.by_key.entry(key.to_string()).or_default();

        while window
            .front()
            .is_some_and(|ts| now.duration_since(*ts) >= self.config.time_window)
        {
            window.pop_front();
        }

        if window.len() >= self.config.max_events {
            return Err(window.len());
        }
        window.push_back(now);
        Ok(())
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn process(&self, event: Event, next: Next) -> Result<Outcome, HandlerError> {
        let key = self.key(&event);
        if let Err(count) = self.admit(key, Instant::now()) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            DropReason::RateLimited.record();
            warn!(
                key,
                event_type = event.event_type(),
                count,
                max_events = self.config.max_events,
                window_ms = self.config.time_window.as_millis() as u64,
                "Rate limit exceeded, dropping event"
            );
            return Ok(Outcome::Dropped(DropReason::RateLimited));
        }

        next.run(event).await
    }
}
