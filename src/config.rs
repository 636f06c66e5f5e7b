use crate::auth::UserPass;
use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:1080";

/// Upper bound on connecting to a target
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on everything before the connect request is parsed
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Size of each relay copy buffer
pub const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// Number of idle relay buffers kept for reuse
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// ServerConfig houses the values the accept loop and its sessions run with
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub auth: Option<UserPass>,
    pub dial_timeout: Duration,
    pub handshake_timeout: Duration,
    pub pool_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            auth: None,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}
