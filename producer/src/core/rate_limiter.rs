//! Per-credential token bucket
//!
//! Every spent token returns to the bucket exactly one refill window
//! (`capacity / refill_per_second`) after it was taken. Refill is computed
//! lazily from the clock on each call; there is no background timer. Because
//! a token cannot be granted twice inside one window, no sliding window of
//! that length ever sees more than `capacity` grants.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use shared::CredentialConfig;
use shared::messages::config::refill_window;

use crate::error::{ProducerError, ProducerResult};

#[derive(Debug)]
struct BucketState {
    available: u32,
    /// Instants at which spent tokens come back, oldest first
    returns: VecDeque<Instant>,
}

impl BucketState {
    fn reclaim(&mut self, now: Instant) {
        while let Some(at) = self.returns.front() {
            if *at > now {
                break;
            }
            self.returns.pop_front();
            self.available += 1;
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    /// `None` when the bucket never refills, or the window overflows a `Duration`
    window: Option<Duration>,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            capacity,
            window: refill_window(capacity, refill_per_second),
            state: Mutex::new(BucketState {
                available: capacity,
                returns: VecDeque::with_capacity(capacity as usize),
            }),
        }
    }

    pub fn for_credential(config: &CredentialConfig) -> Self {
        Self::new(config.capacity, config.refill_per_second)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn window(&self) -> Option<Duration> {
        self.window
    }

    fn state(&self) -> MutexGuard<'_, BucketState> {
        // The state is a counter and a queue; a panic mid-update cannot leave it unusable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take(&self, state: &mut BucketState, now: Instant) {
        state.available -= 1;
        // A return instant past the clock's range never arrives
        if let Some(at) = self.window.and_then(|window| now.checked_add(window)) {
            state.returns.push_back(at);
        }
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state();
        state.reclaim(now);
        if state.available == 0 {
            return false;
        }
        self.take(&mut state, now);
        true
    }

    /// Tokens currently available
    pub fn available(&self) -> u32 {
        let mut state = self.state();
        state.reclaim(Instant::now());
        state.available
    }

    /// Wait for a token until `deadline`.
    ///
    /// Parks until the next computed refill instant instead of polling. Returns
    /// the time spent waiting. Fails immediately when the next refill lies past
    /// the deadline.
    pub async fn acquire(&self, deadline: Instant) -> ProducerResult<Duration> {
        let started = Instant::now();
        loop {
            let wake_at = {
                let now = Instant::now();
                let mut state = self.state();
                state.reclaim(now);
                if state.available > 0 {
                    self.take(&mut state, now);
                    return Ok(now.saturating_duration_since(started));
                }
                match state.returns.front() {
                    Some(at) if *at <= deadline => *at,
                    _ => {
                        return Err(ProducerError::AcquireTimeout {
                            waited_ms: now.saturating_duration_since(started).as_millis() as u64,
                        });
                    }
                }
            };
            tokio::time::sleep_until(wake_at).await;
        }
    }
}
