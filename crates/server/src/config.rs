use craft_net::Pose;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_clients: usize,
    pub spawn: Pose,
    pub accept_interval_ms: u64,
    /// A peer that accepts nothing for this long is dropped. Zero disables it.
    pub write_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: 32,
            spawn: Pose::default(),
            accept_interval_ms: 5,
            write_timeout_ms: 2000,
        }
    }
}
