//! Server engine settings

use shared::NetError;
use std::time::Duration;

/// Highest connection count `Server::init` accepts. DISCONNECT carries the
/// departing connection's id as one byte.
pub const MAX_CONNECTIONS: usize = u8::MAX as usize + 1;

pub const DEFAULT_PORT: u16 = 8007;
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Time between KEEP_ALIVE broadcasts.
    pub keep_alive_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
        }
    }
}

impl ServerConfig {
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), NetError> {
        if self.keep_alive_interval.is_zero() {
            return Err(NetError::InvalidConfig(
                "keep-alive interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Checks the connection limit passed to `Server::init`.
pub fn validate_max_connections(max_connections: usize) -> Result<(), NetError> {
    if max_connections == 0 || max_connections > MAX_CONNECTIONS {
        return Err(NetError::InvalidConfig(format!(
            "max connections must be between 1 and {}, got {}",
            MAX_CONNECTIONS, max_connections
        )));
    }
    Ok(())
}
