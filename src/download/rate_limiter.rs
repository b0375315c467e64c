//! Per-site request spacing, independent of the concurrency bound.
//!
//! Concurrency controls how many transfers run in parallel; the rate
//! limiter controls request cadence against a single site. Requests to
//! different hosts never wait on each other. When a server answers 429
//! with a Retry-After header, that delay is recorded so the next request
//! to the host waits it out.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Upper bound on server-mandated delays; anything longer is clamped.
const MAX_SERVER_DELAY: Duration = Duration::from_secs(3600);

/// Per-host request spacing.
///
/// Designed to be wrapped in `Arc` and shared across spawned tasks; the
/// per-host map is lock-free and each host's schedule is guarded by its
/// own async mutex so one slow host never blocks another.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum spacing between requests to the same host.
    min_delay: Duration,

    /// Whether spacing is disabled (`--rate-limit 0`).
    disabled: bool,

    /// Earliest next-request instant per host. The Arc lets the entry be
    /// cloned out so the map shard lock is not held across an await.
    hosts: DashMap<String, Arc<HostSchedule>>,
}

#[derive(Debug)]
struct HostSchedule {
    ready_at: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a rate limiter with the given minimum inter-request spacing.
    #[must_use]
    #[instrument(skip_all, fields(delay_ms = min_delay.as_millis()))]
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            disabled: false,
            hosts: DashMap::new(),
        }
    }

    /// Creates a disabled rate limiter that applies no spacing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            min_delay: Duration::ZERO,
            disabled: true,
            hosts: DashMap::new(),
        }
    }

    /// Returns whether spacing is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the configured minimum spacing.
    #[must_use]
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Waits until a request to the URL's host is allowed, then claims the
    /// next slot. The first request to a host proceeds immediately.
    #[instrument(skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) {
        if self.disabled {
            return;
        }

        let host = extract_host(url);
        tracing::Span::current().record("host", host.as_str());

        let schedule = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(HostSchedule { ready_at: Mutex::new(None) }))
            .clone();

        // Holding the schedule lock across the sleep serializes waiters for
        // this host, which is what gives (N-1) * min_delay total spacing.
        let mut ready_at = schedule.ready_at.lock().await;
        let now = Instant::now();

        if let Some(at) = *ready_at {
            if at > now {
                let wait = at - now;
                debug!(host = %host, wait_ms = wait.as_millis(), "waiting for rate-limit slot");
                tokio::time::sleep(wait).await;
            }
        }

        *ready_at = Some(Instant::now() + self.min_delay);
    }

    /// Records a server-mandated delay (Retry-After) for the URL's host so
    /// the next request waits at least that long.
    #[instrument(skip(self), fields(host, delay_ms = delay.as_millis()))]
    pub async fn record_server_delay(&self, url: &str, delay: Duration) {
        let host = extract_host(url);
        tracing::Span::current().record("host", host.as_str());
        let delay = delay.min(MAX_SERVER_DELAY);

        let schedule = self
            .hosts
            .entry(host)
            .or_insert_with(|| Arc::new(HostSchedule { ready_at: Mutex::new(None) }))
            .clone();

        let mut ready_at = schedule.ready_at.lock().await;
        let candidate = Instant::now() + delay;
        if ready_at.is_none_or(|at| at < candidate) {
            *ready_at = Some(candidate);
        }
    }
}

/// Extracts the host from a URL for rate-limit keying; malformed URLs fall
/// back to the whole string so they still get a bucket.
fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(ToString::to_string))
        .unwrap_or_else(|| url.to_string())
}

/// Parses a Retry-After header value: either delta-seconds or an RFC 7231
/// HTTP-date.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(std::time::SystemTime::now()).ok()
}
