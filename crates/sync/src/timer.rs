use std::time::Duration;

use cobalt_primitives::error::ErrorCode;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Periodic expiry source for a sync attempt. Each tick surfaces
/// `ChannelTimeout`; the protocol decides whether the measured rate
/// justifies keeping the peer. Dropping the timer disarms it.
pub struct ExpiryTimer {
    interval: Interval,
}

impl ExpiryTimer {
    pub fn new(period: Duration) -> Self {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub async fn tick(&mut self) -> ErrorCode {
        self.interval.tick().await;
        ErrorCode::ChannelTimeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_a_full_period() {
        let mut timer = ExpiryTimer::new(Duration::from_secs(5));
        let started = Instant::now();
        assert_eq!(timer.tick().await, ErrorCode::ChannelTimeout);
        assert!(started.elapsed() >= Duration::from_secs(5));
        let second = Instant::now();
        timer.tick().await;
        assert!(second.elapsed() >= Duration::from_secs(5));
    }
}
