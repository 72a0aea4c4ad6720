use std::net::SocketAddr;

use engine::ConfigError;

/// HTTP server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (default: `0.0.0.0:8080`).
    pub bind_addr: SocketAddr,
    /// Allowed CORS origins; any origin when empty.
    pub cors_origins: Vec<String>,
    /// Bearer token for the cron endpoints.  Cron calls are refused when unset.
    pub cron_secret: Option<String>,
    /// Signing keys for queue deliveries.  Deliveries are refused when the
    /// current key is unset.
    pub queue_current_signing_key: Option<String>,
    pub queue_next_signing_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            cors_origins: Vec::new(),
            cron_secret: None,
            queue_current_signing_key: None,
            queue_next_signing_key: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default        |
    /// |------------------------------|----------------|
    /// | `BIND_ADDR`                  | `0.0.0.0:8080` |
    /// | `CORS_ORIGINS`               | any origin     |
    /// | `CRON_SECRET`                | unset          |
    /// | `QUEUE_CURRENT_SIGNING_KEY`  | unset          |
    /// | `QUEUE_NEXT_SIGNING_KEY`     | unset          |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let bind_addr = match text("BIND_ADDR") {
            None => Self::default().bind_addr,
            Some(value) => value.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "BIND_ADDR",
                reason: e.to_string(),
                value,
            })?,
        };

        let cors_origins = text("CORS_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        Ok(Self {
            bind_addr,
            cors_origins,
            cron_secret: text("CRON_SECRET"),
            queue_current_signing_key: text("QUEUE_CURRENT_SIGNING_KEY"),
            queue_next_signing_key: text("QUEUE_NEXT_SIGNING_KEY"),
        })
    }
}
