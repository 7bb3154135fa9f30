//! Application state and rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use civic_engine::{Classifier, WorkflowService};
use civic_storage::MemoryStorage;
use tokio::sync::Mutex;

use super::RATE_LIMIT_WINDOW_SECS;

/// Per-IP request windows: (request count, window start time).
struct IpTracker {
    clients: HashMap<IpAddr, (u64, Instant)>,
    last_sweep: Instant,
}

impl IpTracker {
    /// Drop clients whose window has expired. Runs at most once per window
    /// so a stream of new addresses stays linear.
    fn sweep(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.last_sweep) < window {
            return;
        }
        self.clients
            .retain(|_, (_, start)| now.duration_since(*start) < window);
        self.last_sweep = now;
    }
}

/// In-memory per-IP rate limiter.
pub(crate) struct RateLimiter {
    tracker: Mutex<IpTracker>,
    window: Duration,
    /// Maximum requests per window.
    pub(crate) max_requests: u64,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u64) -> Self {
        Self::with_window(max_requests, Duration::from_secs(RATE_LIMIT_WINDOW_SECS))
    }

    pub(crate) fn with_window(max_requests: u64, window: Duration) -> Self {
        Self {
            tracker: Mutex::new(IpTracker {
                clients: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            window,
            max_requests,
        }
    }

    /// Returns Ok(()) if allowed, Err(retry_after_secs) if rate limited.
    pub(crate) async fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let mut tracker = self.tracker.lock().await;
        let now = Instant::now();
        tracker.sweep(now, self.window);

        let entry = tracker.clients.entry(ip).or_insert((0, now));

        let mut elapsed = now.duration_since(entry.1);
        if elapsed >= self.window {
            entry.0 = 0;
            entry.1 = now;
            elapsed = Duration::ZERO;
        }

        entry.0 += 1;
        if entry.0 > self.max_requests {
            Err(self.window.saturating_sub(elapsed).as_secs().max(1))
        } else {
            Ok(())
        }
    }

    #[cfg(test)]
    async fn tracked_clients(&self) -> usize {
        self.tracker.lock().await.clients.len()
    }
}

/// Application state shared across request handlers.
pub(crate) struct AppState {
    pub(crate) workflow: WorkflowService<MemoryStorage>,
    /// Consulted at intake when configured.
    pub(crate) classifier: Option<Arc<dyn Classifier>>,
    pub(crate) rate_limiter: RateLimiter,
    /// None = no auth required.
    pub(crate) api_key: Option<String>,
}
