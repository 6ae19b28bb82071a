//! Abandoned-connection tracking configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Controls when checked-out connections count as abandoned and how their
/// reclamation is reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbandonedConfig {
    /// Sweep for abandoned connections before satisfying a borrow
    remove_abandoned_on_borrow: bool,
    /// Sweep for abandoned connections during pool maintenance
    remove_abandoned_on_maintenance: bool,
    /// Idle time in milliseconds after which a checked-out connection is abandoned
    remove_abandoned_timeout_ms: u64,
    /// Log a warning with call sites for every reclaimed connection
    log_abandoned: bool,
    /// Capture a call site on borrow and on every use
    usage_tracking: bool,
}

impl AbandonedConfig {
    pub fn new(timeout: Duration) -> Self {
        Self {
            remove_abandoned_timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            ..Default::default()
        }
    }

    pub fn with_remove_on_borrow(mut self, enabled: bool) -> Self {
        self.remove_abandoned_on_borrow = enabled;
        self
    }

    pub fn with_remove_on_maintenance(mut self, enabled: bool) -> Self {
        self.remove_abandoned_on_maintenance = enabled;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.remove_abandoned_timeout_ms = timeout_ms;
        self
    }

    pub fn with_log_abandoned(mut self, enabled: bool) -> Self {
        self.log_abandoned = enabled;
        self
    }

    pub fn with_usage_tracking(mut self, enabled: bool) -> Self {
        self.usage_tracking = enabled;
        self
    }

    pub fn remove_on_borrow(&self) -> bool {
        self.remove_abandoned_on_borrow
    }

    pub fn remove_on_maintenance(&self) -> bool {
        self.remove_abandoned_on_maintenance
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.remove_abandoned_timeout_ms)
    }

    pub fn log_abandoned(&self) -> bool {
        self.log_abandoned
    }

    pub fn usage_tracking(&self) -> bool {
        self.usage_tracking
    }

    /// Whether any sweep trigger is enabled
    pub fn is_enabled(&self) -> bool {
        self.remove_abandoned_on_borrow || self.remove_abandoned_on_maintenance
    }
}

impl Default for AbandonedConfig {
    /// Defaults:
    /// - no sweep triggers
    /// - timeout: 300 seconds
    /// - no logging, no usage tracking
    fn default() -> Self {
        Self {
            remove_abandoned_on_borrow: false,
            remove_abandoned_on_maintenance: false,
            remove_abandoned_timeout_ms: 300_000,
            log_abandoned: false,
            usage_tracking: false,
        }
    }
}
