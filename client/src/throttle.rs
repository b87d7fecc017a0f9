//! Multi-window rate limiting with coalescing retries.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

use crate::config::RateLimit;

/// What the caller should do after asking the throttle to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// No limit was violated; the firing time was recorded and the caller
    /// should invoke the throttled callback now.
    Allowed,
    /// A limit was violated and no retry was armed yet; the caller must
    /// arrange for [`Throttle::retry_ready`] plus a re-fire after this delay.
    Deferred(Duration),
    /// A retry is already armed; this call coalesces with it.
    Suppressed,
}

/// Enforces a list of `(window_size, count)` limits simultaneously on a
/// single callback: across any window `w`, at most `c` firings occur.
///
/// The throttle keeps a buffer of recent firing times as large as the highest
/// `count` in the limits, so it consumes space proportional to the largest
/// limit. It holds no locks and schedules nothing itself; the caller owns
/// both, which keeps all mutation under the caller's serialization lock.
pub struct Throttle {
    rate_limits: Vec<RateLimit>,
    timer_armed: bool,
    recent_fire_times: VecDeque<SystemTime>,
    max_recent_events: usize,
    largest_window: Duration,
}

impl Throttle {
    pub fn new(rate_limits: Vec<RateLimit>) -> Self {
        let max_recent_events = rate_limits.iter().map(|limit| limit.count).max().unwrap_or(0);
        let largest_window = rate_limits
            .iter()
            .map(|limit| limit.window_size)
            .max()
            .unwrap_or(Duration::ZERO);
        Self {
            rate_limits,
            timer_armed: false,
            recent_fire_times: VecDeque::with_capacity(max_recent_events),
            max_recent_events,
            largest_window,
        }
    }

    /// Attempts to fire the throttled callback at `now`.
    pub fn fire(&mut self, now: SystemTime) -> FireOutcome {
        if self.timer_armed {
            // Excess fires are not queued; they ride on the pending retry.
            return FireOutcome::Suppressed;
        }

        self.drop_old_events(now);

        let mut earliest_allowed: Option<SystemTime> = None;
        for limit in &self.rate_limits {
            if limit.count == 0 {
                continue;
            }
            if self.recent_fire_times.len() >= limit.count {
                let pivot = self.recent_fire_times[self.recent_fire_times.len() - limit.count];
                let allowed_at = pivot + limit.window_size;
                if now < allowed_at {
                    earliest_allowed = Some(match earliest_allowed {
                        Some(current) => current.max(allowed_at),
                        None => allowed_at,
                    });
                }
            }
        }

        match earliest_allowed {
            None => {
                self.recent_fire_times.push_back(now);
                if self.recent_fire_times.len() > self.max_recent_events {
                    self.recent_fire_times.pop_front();
                }
                FireOutcome::Allowed
            }
            Some(allowed_at) => {
                self.timer_armed = true;
                FireOutcome::Deferred(
                    allowed_at
                        .duration_since(now)
                        .unwrap_or(Duration::ZERO),
                )
            }
        }
    }

    /// Disarms the pending retry; the caller should follow up with another
    /// [`Throttle::fire`].
    pub fn retry_ready(&mut self) {
        self.timer_armed = false;
    }

    fn drop_old_events(&mut self, now: SystemTime) {
        while let Some(front) = self.recent_fire_times.front() {
            match now.duration_since(*front) {
                Ok(age) if age > self.largest_window => {
                    self.recent_fire_times.pop_front();
                }
                _ => break,
            }
        }
    }
}
