use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Logs how long a migration phase took when dropped.
pub struct PhaseTimer {
    start: Instant,
    phase: String,
    threshold_warn: Duration,
}

impl PhaseTimer {
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            phase: phase.into(),
            threshold_warn: Duration::from_secs(30),
        }
    }

    pub fn with_threshold(mut self, warn_ms: u64) -> Self {
        self.threshold_warn = Duration::from_millis(warn_ms);
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        let elapsed = self.elapsed();
        let elapsed_ms = elapsed.as_millis();
        if elapsed > self.threshold_warn {
            warn!(phase = %self.phase, duration_ms = %elapsed_ms, "Phase exceeded warning threshold");
        } else {
            info!(phase = %self.phase, duration_ms = %elapsed_ms, "Phase completed");
        }
    }
}

pub fn db_span(operation: &str, collection: &str) -> tracing::Span {
    tracing::span!(
        tracing::Level::DEBUG,
        "database",
        operation = operation,
        collection = collection,
        db_type = "mongodb"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_override() {
        let timer = PhaseTimer::new("backup").with_threshold(5);
        assert_eq!(timer.threshold_warn, Duration::from_millis(5));
        assert!(timer.elapsed() < Duration::from_secs(5));
    }
}
