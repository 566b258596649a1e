//! Per-endpoint sliding-window rate limiter.
//!
//! Per-endpoint request history pruned to a 60-second window, a penalty
//! period entered on HTTP 429, and an adaptive limit that nudges up after
//! streaks of success and down after repeated penalties.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// The fixed request-budget groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointGroup {
    Auth,
    Heavy,
    Medium,
    Light,
}

impl EndpointGroup {
    pub fn limit(self) -> u32 {
        match self {
            EndpointGroup::Auth => 5,
            EndpointGroup::Heavy => 10,
            EndpointGroup::Medium => 40,
            EndpointGroup::Light => 50,
        }
    }

    pub fn window(self) -> Duration {
        Duration::from_secs(60)
    }

    pub fn penalty(self) -> Duration {
        Duration::from_secs(60)
    }
}

/// The signal returned on cancellation mid-wait.
#[derive(Debug, Error)]
#[error("rate limiter wait was cancelled")]
pub struct Cancelled;

struct EndpointState {
    group: EndpointGroup,
    effective_limit: u32,
    history: VecDeque<Instant>,
    penalty_until: Option<Instant>,
    consecutive_successes: u32,
    penalty_hits: u32,
}

impl EndpointState {
    fn new(group: EndpointGroup) -> Self {
        Self {
            group,
            effective_limit: group.limit(),
            history: VecDeque::new(),
            penalty_until: None,
            consecutive_successes: 0,
            penalty_hits: 0,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&front) = self.history.front() {
            if now.duration_since(front) > window {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-endpoint utilization snapshot, used by the Metrics Collector.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub endpoint: String,
    pub group: &'static str,
    pub effective_limit: u32,
    pub requests_in_window: usize,
    pub in_penalty: bool,
}

/// Sliding-window, per-endpoint rate limiter. Process-local: no state is
/// persisted across restarts.
pub struct RateLimiter {
    endpoints: Mutex<HashMap<String, EndpointState>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    fn entry<'a>(
        guard: &'a mut HashMap<String, EndpointState>,
        endpoint: &str,
        group: EndpointGroup,
    ) -> &'a mut EndpointState {
        guard
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointState::new(group))
    }

    /// Blocks until `endpoint` (classified into `group`) may proceed under
    /// its current budget. Returns the time actually waited. Honours
    /// `cancel` at every suspension point; a signalled cancellation aborts
    /// the wait with `Cancelled` instead of completing it.
    pub async fn wait(
        &self,
        endpoint: &str,
        group: EndpointGroup,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<Duration, Cancelled> {
        let total_start = Instant::now();
        loop {
            let sleep_for = {
                let mut guard = self.endpoints.lock();
                let state = Self::entry(&mut guard, endpoint, group);
                let now = Instant::now();

                if let Some(until) = state.penalty_until {
                    if now < until {
                        Some(until - now)
                    } else {
                        state.penalty_until = None;
                        None
                    }
                } else {
                    state.prune(now, state.group.window());
                    if state.history.len() as u32 >= state.effective_limit {
                        let oldest = *state.history.front().expect("len >= limit implies len > 0");
                        let window = state.group.window();
                        let elapsed = now.duration_since(oldest);
                        let remaining = window.saturating_sub(elapsed);
                        Some(remaining + Duration::from_millis(100))
                    } else {
                        state.history.push_back(now);
                        None
                    }
                }
            };

            let Some(sleep_for) = sleep_for else {
                break;
            };

            debug!(endpoint, ?sleep_for, "rate limiter waiting");
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = cancel.cancelled() => return Err(Cancelled),
            }
        }

        Ok(total_start.elapsed())
    }

    /// Updates endpoint state from an observed HTTP response. `status` is
    /// the numeric status code; `retry_after` is the parsed `Retry-After`
    /// header value, if present (either a literal duration or an absolute
    /// instant converted by the caller).
    pub fn record_response(
        &self,
        endpoint: &str,
        group: EndpointGroup,
        status: u16,
        retry_after: Option<Duration>,
    ) {
        let mut guard = self.endpoints.lock();
        let state = Self::entry(&mut guard, endpoint, group);

        if status == 429 {
            let penalty = retry_after.unwrap_or_else(|| state.group.penalty());
            state.penalty_until = Some(Instant::now() + penalty);
            state.consecutive_successes = 0;
            state.penalty_hits += 1;
            warn!(endpoint, ?penalty, "endpoint entered penalty period");

            if state.penalty_hits % 3 == 0 {
                let floor = EndpointGroup::Auth.limit();
                state.effective_limit = state.effective_limit.saturating_sub(2).max(floor).min(state.group.limit());
                info!(endpoint, limit = state.effective_limit, "adaptive limit lowered");
            }
            return;
        }

        if (200..300).contains(&status) {
            state.consecutive_successes += 1;
            if state.consecutive_successes % 100 == 0 {
                let ceiling = EndpointGroup::Light.limit();
                state.effective_limit = (state.effective_limit + 1).min(ceiling);
                info!(endpoint, limit = state.effective_limit, "adaptive limit raised");
            }
        }
    }

    /// Read-only snapshot of every endpoint this limiter has seen.
    pub fn snapshot(&self) -> Vec<EndpointSnapshot> {
        let now = Instant::now();
        let guard = self.endpoints.lock();
        guard
            .iter()
            .map(|(endpoint, state)| EndpointSnapshot {
                endpoint: endpoint.clone(),
                group: match state.group {
                    EndpointGroup::Auth => "auth",
                    EndpointGroup::Heavy => "heavy",
                    EndpointGroup::Medium => "medium",
                    EndpointGroup::Light => "light",
                },
                effective_limit: state.effective_limit,
                requests_in_window: state
                    .history
                    .iter()
                    .filter(|&&t| now.duration_since(t) <= state.group.window())
                    .count(),
                in_penalty: state.penalty_until.map(|u| u > now).unwrap_or(false),
            })
            .collect()
    }
}

/// Parses a `Retry-After` header value: either an integer number of
/// seconds, or an HTTP-date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = DateTime::parse_from_rfc2822(value.trim()).ok()?;
    let now = Utc::now();
    let delta = date.with_timezone(&Utc) - now;
    delta.to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn admits_requests_under_the_limit_without_waiting() {
        let limiter = RateLimiter::new();
        let cancel = tokio_util::sync::CancellationToken::new();

        for _ in 0..EndpointGroup::Auth.limit() {
            let waited = limiter
                .wait("auth-endpoint", EndpointGroup::Auth, &cancel)
                .await
                .unwrap();
            assert_eq!(waited, Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_once_the_window_is_full() {
        let limiter = std::sync::Arc::new(RateLimiter::new());
        let cancel = tokio_util::sync::CancellationToken::new();

        for _ in 0..EndpointGroup::Auth.limit() {
            limiter
                .wait("auth-endpoint", EndpointGroup::Auth, &cancel)
                .await
                .unwrap();
        }

        let waited = limiter
            .wait("auth-endpoint", EndpointGroup::Auth, &cancel)
            .await
            .unwrap();
        assert!(waited >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_pending_wait() {
        let limiter = RateLimiter::new();
        let cancel = tokio_util::sync::CancellationToken::new();

        for _ in 0..EndpointGroup::Auth.limit() {
            limiter
                .wait("auth-endpoint", EndpointGroup::Auth, &cancel)
                .await
                .unwrap();
        }

        let limiter = std::sync::Arc::new(limiter);
        let limiter_clone = limiter.clone();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move {
            limiter_clone
                .wait("auth-endpoint", EndpointGroup::Auth, &cancel_clone)
                .await
        });

        tokio::task::yield_now().await;
        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn records_429_enters_penalty() {
        let limiter = RateLimiter::new();
        limiter.record_response("ep", EndpointGroup::Medium, 429, Some(Duration::from_secs(5)));
        let snapshot = limiter.snapshot();
        assert!(snapshot[0].in_penalty);
    }

    #[test]
    fn parses_numeric_retry_after() {
        assert_eq!(parse_retry_after("12"), Some(Duration::from_secs(12)));
    }

    #[test]
    fn parses_http_date_retry_after_in_the_future() {
        let future = Utc::now() + chrono::Duration::seconds(30);
        let header = future.to_rfc2822();
        let parsed = parse_retry_after(&header).unwrap();
        assert!(parsed.as_secs() <= 30);
    }
}
