//! Supervisor configuration

use std::time::Duration;

use crate::errors::ConfigError;
use crate::fault::{FaultScanner, DEFAULT_FAULT_SIGNATURES};
use crate::poller::BridgeRestartPolicy;

/// Tuning knobs for [`BootSupervisor`](crate::supervisor::BootSupervisor)
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Emulator launches before giving up
    pub max_attempts: u32,
    /// Delay between device-list polls
    pub poll_interval: Duration,
    /// Single deadline covering every attempt
    pub boot_timeout: Duration,
    /// Time an exited emulator gets to flush its remaining output
    pub exit_grace: Duration,
    pub bridge_restart: BridgeRestartPolicy,
    pub fault_signatures: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            poll_interval: Duration::from_secs(5),
            boot_timeout: Duration::from_secs(300),
            exit_grace: Duration::from_millis(500),
            bridge_restart: BridgeRestartPolicy::default(),
            fault_signatures: DEFAULT_FAULT_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SupervisorConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_boot_timeout(mut self, boot_timeout: Duration) -> Self {
        self.boot_timeout = boot_timeout;
        self
    }

    pub fn with_exit_grace(mut self, exit_grace: Duration) -> Self {
        self.exit_grace = exit_grace;
        self
    }

    pub fn with_bridge_restart(mut self, policy: BridgeRestartPolicy) -> Self {
        self.bridge_restart = policy;
        self
    }

    pub fn with_fault_signatures<I, S>(mut self, signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fault_signatures = signatures.into_iter().map(Into::into).collect();
        self
    }

    pub fn fault_scanner(&self) -> FaultScanner {
        FaultScanner::new(self.fault_signatures.iter().cloned())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Validation(
                "poll_interval must be greater than 0".to_string(),
            ));
        }
        if self.boot_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "boot_timeout must be greater than 0".to_string(),
            ));
        }
        if self.fault_signatures.is_empty() {
            return Err(ConfigError::Validation(
                "at least one fault signature is required".to_string(),
            ));
        }
        if self.fault_signatures.iter().any(|s| s.is_empty()) {
            return Err(ConfigError::Validation(
                "fault signatures must not be empty strings".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SupervisorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.boot_timeout, Duration::from_secs(300));
        assert_eq!(config.bridge_restart.every_n_polls, 10);
        assert!(config.fault_scanner().is_fault("Kernel panic - not syncing"));
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        assert!(SupervisorConfig::default()
            .with_max_attempts(0)
            .validate()
            .is_err());
        assert!(SupervisorConfig::default()
            .with_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(SupervisorConfig::default()
            .with_boot_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_validation_rejects_empty_signatures() {
        let none: [&str; 0] = [];
        assert!(SupervisorConfig::default()
            .with_fault_signatures(none)
            .validate()
            .is_err());
        assert!(SupervisorConfig::default()
            .with_fault_signatures([""])
            .validate()
            .is_err());
    }
}
