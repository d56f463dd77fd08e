//! API configuration.

use std::time::Duration;

/// Intake server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Timeout for the subscription confirmation callback
    pub handshake_timeout: Duration,
    /// Retries for a failed confirmation callback
    pub handshake_max_retries: u32,
    /// Store decoded notifications under the event archive namespace
    pub archive_events: bool,
    /// Skip sources whose run is already in flight in this process
    pub single_flight: bool,
    /// Expose Prometheus metrics at `/metrics`
    pub metrics_enabled: bool,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            handshake_timeout: Duration::from_secs(10),
            handshake_max_retries: 2,
            archive_events: false,
            single_flight: false,
            metrics_enabled: true,
            max_body_size: 1024 * 1024, // 1MB
            environment: "development".to_string(),
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            handshake_timeout: Duration::from_secs(
                std::env::var("HANDSHAKE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            handshake_max_retries: std::env::var("HANDSHAKE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.handshake_max_retries),
            archive_events: env_flag("ARCHIVE_EVENTS", false),
            single_flight: env_flag("SINGLE_FLIGHT", false),
            metrics_enabled: env_flag("METRICS_ENABLED", true),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}
