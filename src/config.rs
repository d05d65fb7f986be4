use anyhow::Result;
use std::env;
use std::time::Duration;

/// Runtime configuration, loaded once at startup from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Server settings
    pub server_port: u16,

    // Backend CLI settings
    pub claude_bin: String,
    pub request_timeout: Duration,

    // Model name echoed in responses when the request omits one
    pub default_model: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        // Server port, defaults to 8080
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let claude_bin = env::var("CLAUDE_BIN").unwrap_or_else(|_| "claude".to_string());

        // Per-request backend timeout in seconds, defaults to 10 minutes
        let timeout_secs: u64 = env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "600".to_string())
            .parse()
            .unwrap_or(600);

        let default_model = env::var("DEFAULT_MODEL").unwrap_or_else(|_| "claude".to_string());

        Ok(Self {
            server_port,
            claude_bin,
            request_timeout: Duration::from_secs(timeout_secs),
            default_model,
        })
    }
}
