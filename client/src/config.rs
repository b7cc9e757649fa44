//! Client engine settings

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8007;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Answer every KEEP_ALIVE from the server with one of our own.
    pub echo_keep_alive: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            echo_keep_alive: true,
        }
    }
}

impl ClientConfig {
    pub fn with_echo_keep_alive(mut self, echo: bool) -> Self {
        self.echo_keep_alive = echo;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert!(ClientConfig::default().echo_keep_alive);
        assert!(!ClientConfig::default().with_echo_keep_alive(false).echo_keep_alive);
    }
}
