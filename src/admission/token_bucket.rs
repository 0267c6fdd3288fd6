use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use super::{Quota, instant_now};

/// A token bucket refilled continuously at `rate` tokens per second, holding at most `burst`.
///
/// Each admitted call consumes one token. Refill is computed lazily from the time elapsed since
/// the previous call, so an idle bucket costs nothing. A bucket built from [`Quota::closed`]
/// never admits anything.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(quota: Quota) -> Self {
        Self::new_at(quota, instant_now())
    }

    pub(crate) fn new_at(quota: Quota, now: Instant) -> Self {
        // NaN and negative rates never refill.
        let rate = if quota.rate > 0.0 { quota.rate } else { 0.0 };
        let burst = f64::from(quota.burst);
        Self {
            rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: now,
            }),
        }
    }

    /// Consumes one token if one is available.
    pub fn allow(&self) -> bool {
        self.allow_at(instant_now())
    }

    pub(crate) fn allow_at(&self, now: Instant) -> bool {
        if self.rate.is_infinite() {
            return true;
        }

        let mut state = self.lock();
        self.refill(&mut state, now);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available, without consuming any.
    pub fn available(&self) -> f64 {
        let mut state = self.lock();
        self.refill(&mut state, instant_now());
        state.tokens
    }

    pub fn quota(&self) -> Quota {
        // `burst` was built from a u32.
        Quota::new(self.rate, self.burst as u32)
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        // Callers racing on the lock may arrive with an older `now`; time never runs backwards.
        let elapsed = now.saturating_duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
        state.last_refill = now;
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn burst_then_reject() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(Quota::new(2.0, 3), start);

        assert!(bucket.allow_at(start));
        assert!(bucket.allow_at(start));
        assert!(bucket.allow_at(start));
        assert!(!bucket.allow_at(start));
    }

    #[test]
    fn refills_one_token_per_period() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(Quota::new(2.0, 3), start);
        for _ in 0..3 {
            assert!(bucket.allow_at(start));
        }
        assert!(!bucket.allow_at(start));

        let later = start + Duration::from_millis(500);
        assert!(bucket.allow_at(later));
        assert!(!bucket.allow_at(later));
    }

    #[test]
    fn refill_is_capped_at_burst() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(Quota::new(10.0, 2), start);
        assert!(bucket.allow_at(start));
        assert!(bucket.allow_at(start));

        let much_later = start + Duration::from_secs(3600);
        assert!(bucket.allow_at(much_later));
        assert!(bucket.allow_at(much_later));
        assert!(!bucket.allow_at(much_later));
    }

    #[test]
    fn closed_quota_always_rejects() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(Quota::closed(), start);

        assert!(!bucket.allow_at(start));
        assert!(!bucket.allow_at(start + Duration::from_secs(60)));
    }

    #[test]
    fn zero_rate_never_refills() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(Quota::new(0.0, 1), start);

        assert!(bucket.allow_at(start));
        assert!(!bucket.allow_at(start + Duration::from_secs(3600)));
    }

    #[test]
    fn infinite_rate_admits_everything() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(Quota::new(f64::INFINITY, 0), start);

        for _ in 0..1000 {
            assert!(bucket.allow_at(start));
        }
    }

    #[test]
    fn stale_instant_does_not_rewind_refill() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(Quota::new(1.0, 1), start);
        let later = start + Duration::from_secs(1);

        assert!(bucket.allow_at(later));
        // An older timestamp must not earn back the second that already elapsed.
        assert!(!bucket.allow_at(start));
        assert!(!bucket.allow_at(later));
    }

    #[test]
    fn concurrent_callers_never_overspend() {
        let bucket = Arc::new(TokenBucket::new(Quota::new(0.0, 50)));
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                let admitted = Arc::clone(&admitted);
                thread::spawn(move || {
                    for _ in 0..100 {
                        if bucket.allow() {
                            admitted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::Relaxed), 50);
        assert_eq!(bucket.available(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn refills_with_runtime_clock() {
        let bucket = TokenBucket::new(Quota::new(4.0, 1));
        assert!(bucket.allow());
        assert!(!bucket.allow());

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(bucket.allow());
        assert!(!bucket.allow());
    }
}
