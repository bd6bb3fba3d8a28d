//! Device configuration.

use std::time::Duration;

/// Environment variable overriding the transfer wait, in milliseconds.
/// `0` waits indefinitely.
pub const TRANSFER_TIMEOUT_ENV: &str = "STAGEARRAY_TRANSFER_TIMEOUT_MS";

/// Configuration for a [`Device`](crate::Device).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Queue family for compute work (default: discovered)
    pub compute_family: Option<u32>,

    /// Queue family for transfers (default: discovered, else compute)
    pub transfer_family: Option<u32>,

    /// Upper bound on a synchronous transfer (default: 30 s, `None` = unbounded)
    pub transfer_timeout: Option<Duration>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            compute_family: None,
            transfer_family: None,
            transfer_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl DeviceConfig {
    /// Default config with overrides from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(timeout) = std::env::var(TRANSFER_TIMEOUT_ENV)
            .ok()
            .and_then(|value| parse_timeout_ms(&value))
        {
            config.transfer_timeout = timeout;
        }
        config
    }

    /// Route compute and transfer work through one family.
    pub fn single_queue(family: u32) -> Self {
        Self {
            compute_family: Some(family),
            transfer_family: Some(family),
            ..Self::default()
        }
    }

    /// Builder pattern: set the compute queue family.
    pub fn with_compute_family(mut self, family: u32) -> Self {
        self.compute_family = Some(family);
        self
    }

    /// Builder pattern: set the transfer queue family.
    pub fn with_transfer_family(mut self, family: u32) -> Self {
        self.transfer_family = Some(family);
        self
    }

    /// Builder pattern: set the transfer wait bound.
    pub fn with_transfer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transfer_timeout = timeout;
        self
    }
}

/// `Some(None)` for an unbounded wait, `None` if unparsable.
fn parse_timeout_ms(value: &str) -> Option<Option<Duration>> {
    match value.trim().parse::<u64>().ok()? {
        0 => Some(None),
        ms => Some(Some(Duration::from_millis(ms))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.compute_family, None);
        assert_eq!(config.transfer_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_builders() {
        let config = DeviceConfig::single_queue(2).with_transfer_timeout(None);
        assert_eq!(config.compute_family, Some(2));
        assert_eq!(config.transfer_family, Some(2));
        assert_eq!(config.transfer_timeout, None);
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout_ms("0"), Some(None));
        assert_eq!(parse_timeout_ms(" 250 "), Some(Some(Duration::from_millis(250))));
        assert_eq!(parse_timeout_ms("soon"), None);
    }
}
