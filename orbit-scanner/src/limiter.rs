use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const MIN_RATE: f64 = 0.01;

/// Token bucket shared by every in-flight scraper call of one build.
pub struct RateLimiter {
    rate_per_second: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Bucket starts full with `burst` tokens and refills at `rate_per_second`.
    pub fn new(rate_per_second: f64, burst: u32) -> Self {
        let rate_per_second = if rate_per_second.is_finite() {
            rate_per_second.max(MIN_RATE)
        } else {
            MIN_RATE
        };
        let burst = f64::from(burst.max(1));

        Self {
            rate_per_second,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rate_per_second(&self) -> f64 {
        self.rate_per_second
    }

    pub fn burst(&self) -> u32 {
        self.burst as u32
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate_per_second)
                    .max(Duration::from_millis(1))
            };
            debug!("Rate limiter empty, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available, after refilling.
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_second).min(self.burst);
        bucket.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_immediate() {
        let limiter = RateLimiter::new(1.0, 3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_refill_after_burst() {
        let limiter = RateLimiter::new(2.0, 1);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        // two refills at 2 tokens/s
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert!(start.elapsed() < Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_the_bucket() {
        let limiter = Arc::new(RateLimiter::new(10.0, 2));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 2 from the burst, 4 more at 10/s
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_never_exceeds_burst() {
        let limiter = RateLimiter::new(100.0, 4);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(limiter.available().await <= 4.0);
    }

    #[test]
    fn test_invalid_rate_is_clamped() {
        let limiter = RateLimiter::new(0.0, 0);
        assert!(limiter.rate_per_second() > 0.0);
        assert_eq!(limiter.burst(), 1);

        let limiter = RateLimiter::new(f64::NAN, 5);
        assert!(limiter.rate_per_second() > 0.0);
    }
}
