//! Inter-request pacing.
//!
//! Each request after the first waits the base delay plus a uniform jitter
//! of up to one more delay, measured from the previous request, so
//! consecutive requests land between one and two delays apart. A
//! `governor` direct limiter holds the one-delay floor.

use governor::{Quota, RateLimiter};
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Paces one session's requests.
pub struct RequestPacer {
    limiter: Option<DirectRateLimiter>,
    period: Duration,
    last_request: Option<Instant>,
}

impl RequestPacer {
    /// A zero delay disables pacing.
    pub fn new(delay: Duration) -> Self {
        Self {
            limiter: Quota::with_period(delay).map(RateLimiter::direct),
            period: delay,
            last_request: None,
        }
    }

    /// Wait until the next request may go out. The first call returns
    /// immediately.
    pub async fn wait(&mut self) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        match self.last_request {
            None => {
                let _ = limiter.check();
            }
            Some(last) => {
                tokio::time::sleep_until(last + self.period + self.jitter()).await;
                limiter.until_ready().await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.period.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_zero_delay_never_waits() {
        let mut pacer = RequestPacer::new(Duration::ZERO);
        let start = Instant::now();
        tokio_test::block_on(async {
            for _ in 0..10 {
                pacer.wait().await;
            }
        });
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_spacing_at_least_one_period() {
        let delay = Duration::from_millis(40);
        let mut pacer = RequestPacer::new(delay);

        let start = Instant::now();
        pacer.wait().await;
        assert!(start.elapsed() < delay);

        let mut last = Instant::now();
        for _ in 0..3 {
            pacer.wait().await;
            let now = Instant::now();
            assert!(now - last >= delay - Duration::from_millis(2));
            last = now;
        }
    }

    #[tokio::test]
    async fn test_gaps_spread_between_one_and_two_periods() {
        let delay = Duration::from_millis(40);
        let mut pacer = RequestPacer::new(delay);

        pacer.wait().await;
        let mut last = Instant::now();
        let mut gaps = Vec::new();
        for _ in 0..12 {
            pacer.wait().await;
            let now = Instant::now();
            gaps.push(now - last);
            last = now;
        }

        for gap in &gaps {
            assert!(*gap >= delay - Duration::from_millis(2), "gap {:?} below delay", gap);
            assert!(*gap <= delay * 2 + Duration::from_millis(30), "gap {:?} above 2x delay", gap);
        }
        // jitter must actually push some gaps past the base delay
        assert!(
            gaps.iter().any(|g| *g > delay + delay / 4),
            "no jitter observed: {:?}",
            gaps
        );
    }

    #[test]
    fn test_jitter_bounded_by_period() {
        let pacer = RequestPacer::new(Duration::from_millis(100));
        for _ in 0..100 {
            assert!(pacer.jitter() <= Duration::from_millis(100));
        }
    }
}
