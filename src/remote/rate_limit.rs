// Request pacing for the upstream content API.
//
// Content APIs typically allow a fixed number of lookups per window (for
// example 900 per 15 minutes). The limiter keeps a sliding window of request
// timestamps and makes callers wait when it is full, plus a minimum gap
// between consecutive requests so backfills don't burst.
//
// Rate-limit *responses* are not retried here: a 429 becomes a transient
// hydration error and the dispatch loop re-enqueues the event, so one slow
// item never holds up the rest of the queue.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

/// A sliding-window rate limiter. Shareable via `&self`.
#[derive(Debug)]
pub struct RateLimiter {
    /// Timestamps of requests inside the current window.
    requests: Mutex<VecDeque<Instant>>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// - `max_requests_per_window`: how many requests are allowed in the window
    /// - `window`: the sliding window length
    /// - `min_delay`: minimum gap between consecutive requests
    pub fn new(max_requests_per_window: u32, window: Duration, min_delay: Duration) -> Self {
        Self {
            requests: Mutex::new(VecDeque::new()),
            max_requests: max_requests_per_window.max(1),
            window,
            min_delay,
            last_request: Mutex::new(None),
        }
    }

    /// Wait until a request may be made, then record it.
    pub async fn acquire(&self) {
        // Compute the wait while holding the lock, sleep after dropping it.
        let min_delay_wait = lock(&self.last_request).and_then(|last| {
            let elapsed = last.elapsed();
            (elapsed < self.min_delay).then(|| self.min_delay - elapsed)
        });

        if let Some(wait) = min_delay_wait {
            tokio::time::sleep(wait).await;
        }

        loop {
            let wait = {
                let now = Instant::now();
                let mut requests = lock_mut(&self.requests);

                while let Some(&oldest) = requests.front() {
                    if now.duration_since(oldest) >= self.window {
                        requests.pop_front();
                    } else {
                        break;
                    }
                }

                if (requests.len() as u32) < self.max_requests {
                    requests.push_back(now);
                    *lock_mut(&self.last_request) = Some(now);
                    None
                } else {
                    requests
                        .front()
                        .map(|&oldest| (oldest + self.window).saturating_duration_since(now))
                }
            };

            match wait {
                None => return,
                Some(wait) => {
                    info!(
                        delay_ms = wait.as_millis() as u64,
                        "Content API rate limit: waiting before next request"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Requests currently counted against the window.
    pub fn in_window(&self) -> usize {
        lock_mut(&self.requests).len()
    }
}

fn lock<T: Copy>(mutex: &Mutex<T>) -> T {
    *mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lock_mut<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
