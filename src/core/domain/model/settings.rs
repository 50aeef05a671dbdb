//! Timing knobs for process readiness and cluster stabilization.

use std::time::Duration;

/// How long to wait for a freshly spawned server to accept connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessSettings {
    /// Pause before the first probe.
    pub grace: Duration,
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(100),
            interval: Duration::from_millis(200),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Exponential backoff bounded by a total time budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSettings {
    pub initial: Duration,
    pub max: Duration,
    pub budget: Duration,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(2),
            budget: Duration::from_secs(30),
        }
    }
}

/// All tunables of a devbao client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevbaoSettings {
    pub readiness: ReadinessSettings,
    /// Used for every wait on remote state after init, unseal and join.
    pub stabilize: BackoffSettings,
    /// Time between the graceful and the forceful stop signal.
    pub kill_grace: Duration,
}

impl Default for DevbaoSettings {
    fn default() -> Self {
        Self {
            readiness: ReadinessSettings::default(),
            stabilize: BackoffSettings::default(),
            kill_grace: Duration::from_secs(2),
        }
    }
}
