use qnet::NetConfig;

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub net: NetConfig,
    pub frame_rate: u32,
    /// A named level makes the server active, which freezes `maxplayers`.
    pub map: Option<String>,
    /// Server to join once the host is up.
    pub connect: Option<String>,
    /// Seconds `send_to_all` may block while announcing a shutdown.
    pub shutdown_block: f64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            net: NetConfig::default(),
            frame_rate: 72,
            map: None,
            connect: None,
            shutdown_block: 1.0,
        }
    }
}
