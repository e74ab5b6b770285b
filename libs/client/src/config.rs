use std::time::Duration;

/// Client configuration for one Tably backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST API origin (e.g. `https://api.tably.app`).
    pub api_base_url: String,
    /// Realtime gateway origin (e.g. `wss://rt.tably.app`).
    pub gateway_url: String,
    /// User agent sent on REST calls; also the input to the device fingerprint.
    pub user_agent: String,
    /// Per-request timeout for REST calls.
    pub request_timeout: Duration,
    /// Maximum consecutive failed connection attempts before the router gives up.
    pub reconnect_attempts: u32,
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,
    /// How long `join_room` waits for the channel to come up before failing.
    pub connect_wait: Duration,
}

impl ClientConfig {
    /// Build a config with default timing for the given origins.
    pub fn new(api_base_url: impl Into<String>, gateway_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            gateway_url: gateway_url.into(),
            user_agent: default_user_agent(),
            request_timeout: Duration::from_secs(15),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(2),
            connect_wait: Duration::from_secs(10),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        let mut config = Self::new(required_var("TABLY_API_URL"), required_var("TABLY_GATEWAY_URL"));
        if let Some(ua) = std::env::var("TABLY_USER_AGENT").ok().filter(|s| !s.is_empty()) {
            config.user_agent = ua;
        }
        if let Some(attempts) = std::env::var("TABLY_RECONNECT_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.reconnect_attempts = attempts;
        }
        if let Some(ms) = std::env::var("TABLY_RECONNECT_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.reconnect_delay = Duration::from_millis(ms);
        }
        config
    }
}

fn default_user_agent() -> String {
    format!("tably-client/{} ({})", env!("CARGO_PKG_VERSION"), std::env::consts::OS)
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}
