//! Rate limiting for OCR calls.
//!
//! Providers bill and throttle per call. The pipeline takes a permit before
//! each provider call and waits up to a bounded time for one; when the wait
//! expires the caller gets an error rather than an unbounded queue.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{IcrError, Result};

/// Lower bound on the poll interval while waiting for a permit.
const MIN_POLL: Duration = Duration::from_millis(10);

/// Admission control for external calls.
pub trait RateLimiter: Send + Sync {
    /// Take a permit if one is available right now.
    fn try_acquire(&self) -> bool;

    /// Return a permit taken by [`RateLimiter::try_acquire`].
    fn release(&self);

    /// How long until a permit is likely to free up.
    fn retry_after(&self) -> Duration {
        MIN_POLL
    }
}

#[derive(Debug, Default)]
struct WindowState {
    calls: VecDeque<Instant>,
    in_flight: usize,
}

/// Sliding-window limiter: at most `max_per_window` acquisitions in any
/// `window`, and at most `max_in_flight` unreleased permits.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    state: Mutex<WindowState>,
    max_per_window: usize,
    window: Duration,
    max_in_flight: usize,
}

impl SlidingWindowLimiter {
    /// Limiter with a 60-second window.
    pub fn per_minute(max_per_minute: usize) -> Self {
        Self::with_window(max_per_minute, Duration::from_secs(60))
    }

    pub fn with_window(max_per_window: usize, window: Duration) -> Self {
        Self {
            state: Mutex::new(WindowState::default()),
            max_per_window,
            window,
            max_in_flight: usize::MAX,
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn prune(&self, state: &mut WindowState, now: Instant) {
        while let Some(&oldest) = state.calls.front() {
            if now.duration_since(oldest) >= self.window {
                state.calls.pop_front();
            } else {
                break;
            }
        }
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        self.prune(&mut state, now);

        if state.calls.len() >= self.max_per_window || state.in_flight >= self.max_in_flight {
            return false;
        }
        state.calls.push_back(now);
        state.in_flight += 1;
        true
    }

    fn release(&self) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    fn retry_after(&self) -> Duration {
        let now = Instant::now();
        let mut state = self.lock();
        self.prune(&mut state, now);

        if state.calls.len() < self.max_per_window {
            return MIN_POLL;
        }
        state
            .calls
            .front()
            .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
            .unwrap_or(MIN_POLL)
            .max(MIN_POLL)
    }
}

/// A taken permit; released on drop.
pub struct RatePermit<'a> {
    limiter: &'a dyn RateLimiter,
}

impl Drop for RatePermit<'_> {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

/// Wait up to `max_wait` for a permit.
///
/// Fails with [`IcrError::ExternalProvider`] when no permit frees up in time.
pub async fn acquire_permit<'a>(
    limiter: &'a dyn RateLimiter,
    max_wait: Duration,
) -> Result<RatePermit<'a>> {
    let deadline = Instant::now() + max_wait;

    loop {
        if limiter.try_acquire() {
            return Ok(RatePermit { limiter });
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(max_wait_ms = max_wait.as_millis() as u64, "OCR rate limit wait expired");
            return Err(IcrError::ExternalProvider(
                "OCR rate limit exceeded, retry later".into(),
            ));
        }

        let pause = limiter.retry_after().min(deadline - now);
        debug!(pause_ms = pause.as_millis() as u64, "Waiting for OCR rate limit permit");
        tokio::time::sleep(pause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_under_limit() {
        let limiter = SlidingWindowLimiter::with_window(3, Duration::from_secs(60));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_frees_slots() {
        let limiter = SlidingWindowLimiter::with_window(1, Duration::from_secs(1));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_in_flight_cap_and_release() {
        let limiter = SlidingWindowLimiter::with_window(100, Duration::from_secs(60))
            .with_max_in_flight(1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        limiter.release();
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_permit_releases_on_drop() {
        let limiter = SlidingWindowLimiter::with_window(100, Duration::from_secs(60))
            .with_max_in_flight(1);
        {
            let _permit = acquire_permit(&limiter, Duration::ZERO).await.unwrap();
            assert!(!limiter.try_acquire());
        }
        assert!(limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out() {
        let limiter = SlidingWindowLimiter::with_window(1, Duration::from_secs(60));
        let _first = acquire_permit(&limiter, Duration::ZERO).await.unwrap();

        let err = acquire_permit(&limiter, Duration::from_secs(2)).await.err().unwrap();
        assert!(matches!(err, IcrError::ExternalProvider(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_window() {
        let limiter = SlidingWindowLimiter::with_window(1, Duration::from_secs(1));
        let first = acquire_permit(&limiter, Duration::ZERO).await.unwrap();
        drop(first);

        let start = Instant::now();
        let _second = acquire_permit(&limiter, Duration::from_secs(5)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }
}
