use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    min_interval: Duration,
    next_start: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_in_flight: usize, min_interval: Duration) -> Self {
        let permits = max_in_flight.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            min_interval,
            next_start: Arc::new(Mutex::new(None)),
        }
    }

    /// Waits for a call slot. The call may start once this returns and must
    /// hold the permit until it completes.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("rate limiter semaphore is never closed");

        let wait_until = self.reserve_start();
        if let Some(at) = wait_until {
            tokio::time::sleep_until(at).await;
        }
        permit
    }

    fn reserve_start(&self) -> Option<Instant> {
        if self.min_interval.is_zero() {
            return None;
        }
        let now = Instant::now();
        let mut next = self
            .next_start
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let start = match *next {
            Some(at) if at > now => at,
            _ => now,
        };
        *next = Some(start + self.min_interval);
        (start > now).then_some(start)
    }
}
