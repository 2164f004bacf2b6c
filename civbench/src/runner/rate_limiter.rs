//! Sliding-window rate limiter shared by provider clients

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const WINDOW: Duration = Duration::from_secs(60);

/// Limits requests and tokens per rolling minute. A token budget of 0
/// disables the token limit.
pub struct RateLimiter {
    requests_per_minute: u32,
    tokens_per_minute: u32,
    last_requests: Mutex<VecDeque<Instant>>,
    token_usage: Mutex<VecDeque<(Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, tokens_per_minute: u32) -> Self {
        Self {
            requests_per_minute: requests_per_minute.max(1),
            tokens_per_minute,
            last_requests: Mutex::new(VecDeque::new()),
            token_usage: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until a request slot is free, then claim it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut last = self.last_requests.lock().await;
                let now = Instant::now();
                prune(&mut last, now, |t| *t);

                if last.len() < self.requests_per_minute as usize {
                    last.push_back(now);
                    None
                } else {
                    last.front()
                        .map(|&oldest| WINDOW.saturating_sub(now.duration_since(oldest)) + Duration::from_millis(10))
                }
            };

            match wait {
                None => return,
                Some(wait) => {
                    tracing::debug!("Request window full, waiting {}ms", wait.as_millis());
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Record token usage for rate limiting
    pub async fn record_tokens(&self, tokens: u32) {
        let mut usage = self.token_usage.lock().await;
        let now = Instant::now();
        prune(&mut usage, now, |(t, _)| *t);
        usage.push_back((now, tokens));
    }

    /// Tokens used in the last minute
    pub async fn current_token_usage(&self) -> u32 {
        let mut usage = self.token_usage.lock().await;
        prune(&mut usage, Instant::now(), |(t, _)| *t);
        usage.iter().map(|(_, t)| t).sum()
    }

    /// Wait until `needed` tokens fit in the current window.
    ///
    /// Requests larger than the whole budget only wait for an empty window.
    pub async fn wait_for_token_capacity(&self, needed: u32) {
        if self.tokens_per_minute == 0 {
            return;
        }
        let needed = needed.min(self.tokens_per_minute);
        loop {
            let used = self.current_token_usage().await;
            if used == 0 || used.saturating_add(needed) <= self.tokens_per_minute {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

fn prune<T>(queue: &mut VecDeque<T>, now: Instant, at: impl Fn(&T) -> Instant) {
    while let Some(front) = queue.front() {
        if now.duration_since(at(front)) > WINDOW {
            queue.pop_front();
        } else {
            break;
        }
    }
}
