//! Per-agent overload detection
//!
//! Counts METRIC packets accepted from an agent. Once the count exceeds the
//! ceiling every following ACK for that agent carries the flow-control flag.
//! With the default sticky policy the count never decays; the windowed
//! policy restarts the count at the beginning of each observation window.

use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

/// Accepted-sample count above which an agent is considered overloaded
pub const DEFAULT_OVERLOAD_CEILING: u32 = 5;

/// When the accepted-sample count is reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CongestionPolicy {
    /// Never reset; overload is sticky once reached
    #[default]
    Sticky,
    /// Reset the count every `window_secs`
    Windowed { window_secs: u64 },
}

#[derive(Debug, Clone)]
pub struct CongestionEstimator {
    ceiling: u32,
    policy: CongestionPolicy,
    count: u32,
    window_start: Instant,
}

impl CongestionEstimator {
    pub fn new(ceiling: u32, policy: CongestionPolicy, now: Instant) -> Self {
        Self {
            ceiling,
            policy,
            count: 0,
            window_start: now,
        }
    }

    /// Account for one accepted sample and report whether the agent is overloaded
    pub fn record_accept(&mut self, now: Instant) -> bool {
        if let CongestionPolicy::Windowed { window_secs } = self.policy {
            if now.duration_since(self.window_start) >= Duration::from_secs(window_secs) {
                self.count = 0;
                self.window_start = now;
            }
        }
        self.count = self.count.saturating_add(1);
        self.is_overloaded()
    }

    pub fn is_overloaded(&self) -> bool {
        self.count > self.ceiling
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sticky_overload_after_ceiling() {
        let start = Instant::now();
        let mut estimator =
            CongestionEstimator::new(DEFAULT_OVERLOAD_CEILING, CongestionPolicy::Sticky, start);

        for _ in 0..5 {
            assert!(!estimator.record_accept(start));
        }
        assert!(estimator.record_accept(start));
        assert_eq!(estimator.count(), 6);

        // Never decays
        let much_later = start + Duration::from_secs(3600);
        assert!(estimator.record_accept(much_later));
    }

    #[test]
    fn test_windowed_policy_resets() {
        let start = Instant::now();
        let policy = CongestionPolicy::Windowed { window_secs: 10 };
        let mut estimator = CongestionEstimator::new(2, policy, start);

        assert!(!estimator.record_accept(start));
        assert!(!estimator.record_accept(start));
        assert!(estimator.record_accept(start + Duration::from_secs(1)));

        // New window starts counting from zero
        assert!(!estimator.record_accept(start + Duration::from_secs(11)));
        assert_eq!(estimator.count(), 1);
    }

    #[test]
    fn test_policy_deserializes() {
        let sticky: CongestionPolicy = serde_json::from_str(r#"{"mode":"sticky"}"#).unwrap();
        assert_eq!(sticky, CongestionPolicy::Sticky);

        let windowed: CongestionPolicy =
            serde_json::from_str(r#"{"mode":"windowed","window_secs":30}"#).unwrap();
        assert_eq!(windowed, CongestionPolicy::Windowed { window_secs: 30 });
    }
}
