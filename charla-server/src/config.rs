//! Server configuration.

use clap::Parser;

/// Command-line and environment configuration. State is entirely
/// in-memory, so there is nothing to configure beyond the listener.
#[derive(Parser, Debug, Clone)]
#[command(name = "charla-server", version, about = "Line-based TCP chat relay")]
pub struct ServerConfig {
    /// Address to listen on.
    #[arg(long, env = "CHARLA_LISTEN_ADDR", default_value = "127.0.0.1:65432")]
    pub listen_addr: String,
}

impl ServerConfig {
    /// Loopback with an ephemeral port, for tests.
    pub fn ephemeral() -> Self {
        Self { listen_addr: "127.0.0.1:0".to_string() }
    }
}
