use std::net::IpAddr;
use std::path::PathBuf;

use crate::net::{DEFAULT_PORT, MAX_SCOREBOARD};
use crate::stats::PacketLossSimulation;

pub const DEFAULT_MESSAGE_TIMEOUT: f64 = 300.0;

#[derive(Debug, Clone)]
pub struct NetConfig {
    pub host_port: u16,
    pub listen: bool,
    /// A dedicated server has no local client slot in the socket pool.
    pub dedicated: bool,
    pub max_clients: usize,
    pub max_clients_limit: usize,
    /// Seconds without any inbound message before a socket is closed.
    pub message_timeout: f64,
    pub host_name: String,
    /// Overrides local address detection.
    pub local_ip: Option<IpAddr>,
    pub no_lan: bool,
    pub record: Option<PathBuf>,
    pub playback: Option<PathBuf>,
    pub packet_loss: Option<PacketLossSimulation>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            host_port: DEFAULT_PORT,
            listen: false,
            dedicated: false,
            max_clients: 8,
            max_clients_limit: MAX_SCOREBOARD,
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            host_name: "UNNAMED".to_string(),
            local_ip: None,
            no_lan: false,
            record: None,
            playback: None,
            packet_loss: None,
        }
    }
}

impl NetConfig {
    /// Slots allocated once at startup.
    pub fn pool_capacity(&self) -> usize {
        if self.dedicated {
            self.max_clients_limit
        } else {
            self.max_clients_limit + 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NetConfig::default();
        assert_eq!(config.host_port, 26000);
        assert_eq!(config.message_timeout, 300.0);
        assert_eq!(config.max_clients_limit, 16);
        assert!(config.max_clients <= config.max_clients_limit);
    }

    #[test]
    fn test_pool_reserves_local_client_slot() {
        let mut config = NetConfig::default();
        assert_eq!(config.pool_capacity(), 17);
        config.dedicated = true;
        assert_eq!(config.pool_capacity(), 16);
    }
}
