//! Configuration for the decision engine and the dispatcher

use std::time::Duration;

/// Decision engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval handed to stations on accepted boot
    pub heartbeat_interval: Duration,

    /// Added to "now" to compute the expiry of an accepted tag
    pub tag_validity: Duration,

    /// Protocol version recorded against booted stations
    pub protocol_version: String,
}

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// A target with no reply inside this window resolves to `Timeout`
    pub delivery_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(14400),
            tag_validity: Duration::from_secs(3600),
            protocol_version: "1.6".to_string(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Set heartbeat interval in seconds
    pub fn with_heartbeat_interval(mut self, secs: u64) -> Self {
        self.heartbeat_interval = Duration::from_secs(secs);
        self
    }

    /// Set tag validity window in hours
    pub fn with_tag_validity_hours(mut self, hours: u64) -> Self {
        self.tag_validity = Duration::from_secs(hours * 3600);
        self
    }

    /// Heartbeat interval in whole seconds as sent on the wire, saturating
    pub fn heartbeat_interval_secs(&self) -> u32 {
        u32::try_from(self.heartbeat_interval.as_secs()).unwrap_or(u32::MAX)
    }

    /// Set protocol version label
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }
}

impl DispatcherConfig {
    /// Set delivery timeout
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let engine = EngineConfig::default()
            .with_heartbeat_interval(60)
            .with_tag_validity_hours(2)
            .with_protocol_version("1.5");
        assert_eq!(engine.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(engine.tag_validity, Duration::from_secs(7200));
        assert_eq!(engine.protocol_version, "1.5");

        let dispatcher = DispatcherConfig::default().with_delivery_timeout(Duration::from_secs(5));
        assert_eq!(dispatcher.delivery_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_heartbeat_interval_saturates() {
        assert_eq!(EngineConfig::default().heartbeat_interval_secs(), 14400);

        let huge = EngineConfig::default().with_heartbeat_interval(u64::from(u32::MAX) + 10);
        assert_eq!(huge.heartbeat_interval_secs(), u32::MAX);
    }
}
