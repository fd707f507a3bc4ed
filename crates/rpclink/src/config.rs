use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Client tuning. `None` disables a deadline or the keepalive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Failed redials tolerated before the client gives up.
    pub max_reconnect_attempts: u32,
    pub read_wait: Option<Duration>,
    pub write_wait: Option<Duration>,
    /// Keepalive ping interval.
    pub ping_period: Option<Duration>,
    /// Install a no-op latency sink instead of the timer.
    pub skip_metrics: bool,
    /// How long `stop` waits for workers to wind down before aborting them.
    pub shutdown_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            read_wait: None,
            write_wait: Some(DEFAULT_WRITE_WAIT),
            ping_period: None,
            skip_metrics: false,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}

impl ClientConfig {
    pub fn with_max_reconnect_attempts(mut self, n: u32) -> Self {
        self.max_reconnect_attempts = n;
        self
    }

    /// Zero disables the read deadline.
    pub fn with_read_wait(mut self, wait: Duration) -> Self {
        self.read_wait = non_zero(wait);
        self
    }

    /// Zero disables the write deadline.
    pub fn with_write_wait(mut self, wait: Duration) -> Self {
        self.write_wait = non_zero(wait);
        self
    }

    /// Zero disables keepalive pings.
    pub fn with_ping_period(mut self, period: Duration) -> Self {
        self.ping_period = non_zero(period);
        self
    }

    pub fn with_skip_metrics(mut self, skip: bool) -> Self {
        self.skip_metrics = skip;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// A pong can only keep a read deadline alive if pings go out more often
    /// than the deadline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let (Some(ping), Some(read)) = (self.ping_period, self.read_wait)
            && ping >= read
        {
            return Err(ConfigError::PingNotBelowReadWait { ping, read });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.write_wait, Some(Duration::from_secs(10)));
        assert_eq!(config.read_wait, None);
        assert_eq!(config.ping_period, None);
        assert!(!config.skip_metrics);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_disables() {
        let config = ClientConfig::default()
            .with_write_wait(Duration::ZERO)
            .with_ping_period(Duration::ZERO);
        assert_eq!(config.write_wait, None);
        assert_eq!(config.ping_period, None);
    }

    #[test]
    fn ping_must_beat_read_wait() {
        let config = ClientConfig::default()
            .with_read_wait(Duration::from_secs(30))
            .with_ping_period(Duration::from_secs(30));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::PingNotBelowReadWait { .. }));

        let config = config.with_ping_period(Duration::from_secs(27));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn ping_without_read_wait_is_fine() {
        let config = ClientConfig::default().with_ping_period(Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }
}
