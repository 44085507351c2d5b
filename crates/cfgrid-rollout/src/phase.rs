//! Rollout phases and settings.

use std::fmt;
use std::time::Duration;

use cfgrid_core::CfgridConfig;

/// Phase of a rollout as it moves through the state machine.
///
/// ```text
/// Locked → JobCreated → Fetching → Broadcasting → Waiting
///        → Converged | TimedOut | PeerFailed | FetchFailed → Released
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutPhase {
    Locked,
    JobCreated,
    Fetching,
    Broadcasting,
    Waiting,
    Converged,
    TimedOut,
    /// A peer reported RED during the wait.
    PeerFailed,
    FetchFailed,
    Released,
}

impl RolloutPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutPhase::Locked => "LOCKED",
            RolloutPhase::JobCreated => "JOB_CREATED",
            RolloutPhase::Fetching => "FETCHING",
            RolloutPhase::Broadcasting => "BROADCASTING",
            RolloutPhase::Waiting => "WAITING",
            RolloutPhase::Converged => "CONVERGED",
            RolloutPhase::TimedOut => "TIMED_OUT",
            RolloutPhase::PeerFailed => "PEER_FAILED",
            RolloutPhase::FetchFailed => "FETCH_FAILED",
            RolloutPhase::Released => "RELEASED",
        }
    }
}

impl fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables of the coordinator.
#[derive(Debug, Clone)]
pub struct RolloutSettings {
    /// Name of the locked configuration resource.
    pub resource: String,
    /// Pub/sub channel carrying new config hashes.
    pub channel: String,
    pub poll_interval: Duration,
    pub convergence_timeout: Duration,
    /// Status records older than this are ignored while waiting.
    pub status_max_age: Duration,
}

impl RolloutSettings {
    /// Number of convergence checks in one wait, at least one.
    pub fn rounds(&self) -> u32 {
        let interval = self.poll_interval.as_millis().max(1);
        (self.convergence_timeout.as_millis() / interval).clamp(1, u32::MAX as u128) as u32
    }
}

impl From<&CfgridConfig> for RolloutSettings {
    fn from(config: &CfgridConfig) -> Self {
        Self {
            resource: config.rollout.resource.clone(),
            channel: config.rollout.channel.clone(),
            poll_interval: config.rollout.poll_interval,
            convergence_timeout: config.rollout.convergence_timeout,
            status_max_age: config.status.max_age,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(interval_ms: u64, timeout_ms: u64) -> RolloutSettings {
        RolloutSettings {
            resource: "config".to_string(),
            channel: "config-updates".to_string(),
            poll_interval: Duration::from_millis(interval_ms),
            convergence_timeout: Duration::from_millis(timeout_ms),
            status_max_age: Duration::from_secs(30),
        }
    }

    #[test]
    fn rounds_divide_timeout_by_interval() {
        assert_eq!(settings(2_000, 120_000).rounds(), 60);
        assert_eq!(settings(300, 1_000).rounds(), 3);
        assert_eq!(settings(5_000, 1_000).rounds(), 1);
        assert_eq!(settings(0, 0).rounds(), 1);
    }

    #[test]
    fn defaults_come_from_config() {
        let config = CfgridConfig::default();
        let settings = RolloutSettings::from(&config);
        assert_eq!(settings.resource, "config");
        assert_eq!(settings.rounds(), 60);
    }

    #[test]
    fn phases_display_screaming_snake_case() {
        assert_eq!(RolloutPhase::PeerFailed.to_string(), "PEER_FAILED");
        assert_eq!(RolloutPhase::JobCreated.to_string(), "JOB_CREATED");
    }
}
