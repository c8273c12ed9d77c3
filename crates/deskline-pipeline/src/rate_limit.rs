// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rolling-window limiter shared by every caller of a provider driver.
//!
//! The check and the record happen under one lock, so concurrent workers can
//! never admit more than `max` calls per window between them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use deskline_core::Clock;
use tokio::sync::Mutex;
use tracing::debug;

pub struct RateLimiter {
    max: usize,
    window: TimeDelta,
    clock: Arc<dyn Clock>,
    admitted: Mutex<VecDeque<DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max: max.max(1) as usize,
            window: TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX),
            clock,
            admitted: Mutex::new(VecDeque::new()),
        }
    }

    /// Admit one call now, or report how long until a slot frees up.
    pub async fn try_acquire(&self) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut admitted = self.admitted.lock().await;
        while admitted.front().is_some_and(|&at| now - at >= self.window) {
            admitted.pop_front();
        }
        if admitted.len() < self.max {
            admitted.push_back(now);
            return Ok(());
        }
        let oldest = admitted.front().copied().unwrap_or(now);
        let wait = (oldest + self.window - now).to_std().unwrap_or_default();
        Err(wait.max(Duration::from_millis(1)))
    }

    /// Admit one call, sleeping for a slot for at most `max_wait`.
    ///
    /// With a zero `max_wait` this is a single non-blocking attempt.
    pub async fn acquire_within(&self, max_wait: Duration) -> bool {
        let mut waited = Duration::ZERO;
        loop {
            match self.try_acquire().await {
                Ok(()) => return true,
                Err(wait) if waited + wait <= max_wait => {
                    debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting for a slot");
                    tokio::time::sleep(wait).await;
                    waited += wait;
                }
                Err(_) => return false,
            }
        }
    }

    /// Calls admitted in the current window.
    pub async fn in_window(&self) -> usize {
        let now = self.clock.now();
        self.admitted
            .lock()
            .await
            .iter()
            .filter(|&&at| now - at < self.window)
            .count()
    }
}
