pub mod scheduler;

pub use scheduler::{ReplayControl, ReplayHandle, Scheduler, ShutdownMode};

use crate::{Message, ReplayError, ReplayResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_PROGRESS_INTERVAL: usize = 10_000;

/// Destination of a replay.
#[async_trait]
pub trait Sink: Send {
    async fn connect(&mut self) -> ReplayResult<()> {
        Ok(())
    }

    async fn send(&mut self, topic: &str, message: &Message) -> ReplayResult<()>;

    /// Waits for outstanding deliveries, if the sink tracks any.
    async fn flush(&mut self) -> ReplayResult<()> {
        Ok(())
    }
}

/// How waits between sends are measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pacing {
    /// From the moment the previous send finished.
    #[default]
    Relative,
    /// From the replay start, so time spent sending does not accumulate.
    Anchored,
}

impl std::str::FromStr for Pacing {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relative" => Ok(Pacing::Relative),
            "anchored" => Ok(Pacing::Anchored),
            other => Err(ReplayError::Config(format!("unknown pacing '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOptions {
    /// Divisor for logical-time gaps. Zero sends without any delay.
    pub rate: f64,
    pub abort_on_error: bool,
    pub progress_interval: usize,
    pub start_index: usize,
    pub pacing: Pacing,
}

impl ReplayOptions {
    pub fn with_rate(rate: f64) -> Self {
        Self {
            rate,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ReplayResult<()> {
        if !self.rate.is_finite() || self.rate < 0.0 {
            return Err(ReplayError::Config(format!(
                "rate must be a finite number >= 0, got {}",
                self.rate
            )));
        }
        if self.progress_interval == 0 {
            return Err(ReplayError::Config(
                "progress interval must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_unthrottled(&self) -> bool {
        self.rate == 0.0
    }
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            rate: 1.0,
            abort_on_error: false,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            start_index: 0,
            pacing: Pacing::Relative,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    /// Stopped by an abort before the end of the timeline.
    pub cancelled: bool,
    /// The tail was flushed without delays after a drain request.
    pub drained: bool,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_validation() {
        assert!(ReplayOptions::with_rate(0.0).validate().is_ok());
        assert!(ReplayOptions::with_rate(2.5).validate().is_ok());
        assert!(ReplayOptions::with_rate(-1.0).validate().is_err());
        assert!(ReplayOptions::with_rate(f64::NAN).validate().is_err());
        assert!(ReplayOptions::with_rate(f64::INFINITY).validate().is_err());
    }

    #[test]
    fn test_pacing_from_str() {
        assert_eq!("Anchored".parse::<Pacing>().unwrap(), Pacing::Anchored);
        assert_eq!("relative".parse::<Pacing>().unwrap(), Pacing::Relative);
        assert!("sideways".parse::<Pacing>().is_err());
    }
}
