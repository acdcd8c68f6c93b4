//! Connection configuration.
//!
//! No config file backs this library (it is embedded into a host
//! application), but the shape follows a raw/validated split
//! (`services/forwarder/src/config.rs`): explicit per-field defaults, a
//! dedicated error type for invalid combinations, a builder instead of a
//! TOML loader.

use std::time::Duration;
use thiserror::Error;

/// Per-connection configuration, shared by the client and server
/// controllers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Per-message ack deadline. `Duration::ZERO` disables ack timeouts.
    pub ack_timeout: Duration,
    /// Default per-request deadline when a `send_request` call doesn't
    /// override it. `Duration::ZERO` means no default timeout.
    pub default_operation_timeout: Duration,
    /// Reserved: not enforced by this implementation (no heartbeat
    /// mechanism exists to drive it). Kept so callers that configured it
    /// don't silently lose the setting across a migration. See
    /// `DESIGN.md`.
    pub heartbeat_timeout: Duration,
    /// Whether outgoing records survive a connection-lost event for
    /// later resume, or are dropped outright.
    pub resumption_enabled: bool,
    /// Reserved: how long resumable state should be retained. Not
    /// enforced -- retained records currently live until acked,
    /// responded, or the connection is explicitly closed. See
    /// `DESIGN.md`.
    pub resumption_timeout: Duration,
    /// Delay between reconnect attempts while the client controller is
    /// in persistent mode.
    pub reconnect_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(15_000),
            default_operation_timeout: Duration::ZERO,
            heartbeat_timeout: Duration::from_millis(15_000),
            resumption_enabled: true,
            resumption_timeout: Duration::from_millis(900_000),
            reconnect_delay: Duration::from_millis(1_000),
        }
    }
}

/// Errors raised while finalizing a [`ConfigBuilder`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A persistent-mode client controller needs reconnect attempts to
    /// make forward progress; a zero delay would busy-loop.
    #[error("reconnect_delay must be greater than zero")]
    ZeroReconnectDelay,
}

/// Builds a [`Config`] from [`Config::default`] by overriding individual
/// fields, validating on [`ConfigBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn ack_timeout(mut self, value: Duration) -> Self {
        self.config.ack_timeout = value;
        self
    }

    pub fn default_operation_timeout(mut self, value: Duration) -> Self {
        self.config.default_operation_timeout = value;
        self
    }

    pub fn heartbeat_timeout(mut self, value: Duration) -> Self {
        self.config.heartbeat_timeout = value;
        self
    }

    pub fn resumption_enabled(mut self, value: bool) -> Self {
        self.config.resumption_enabled = value;
        self
    }

    pub fn resumption_timeout(mut self, value: Duration) -> Self {
        self.config.resumption_timeout = value;
        self
    }

    pub fn reconnect_delay(mut self, value: Duration) -> Self {
        self.config.reconnect_delay = value;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        if self.config.reconnect_delay.is_zero() {
            return Err(ConfigError::ZeroReconnectDelay);
        }
        Ok(self.config)
    }
}
