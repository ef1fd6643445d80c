use std::time::Duration;

use rand::Rng;

/// Human reaction-time range applied before every action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    pub min: Duration,
    pub max: Duration,
}

impl Pacing {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn from_secs(min_secs: f64, max_secs: f64) -> Self {
        Self::new(secs(min_secs), secs(max_secs))
    }

    /// No delay at all.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        rand::rng().random_range(self.min..=self.max)
    }

    pub async fn pause(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Sleep a uniformly random duration between `min_secs` and `max_secs`.
pub async fn human_delay(min_secs: f64, max_secs: f64) {
    Pacing::from_secs(min_secs, max_secs).pause().await;
}

/// Seconds as a `Duration`; negative or non-finite values become zero.
pub fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
