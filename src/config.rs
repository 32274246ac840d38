//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Pipeline Configuration
//!
//! - `BARE_HOST` / `CANONICAL_HOST`: host redirected and its `www.` target
//! - `THREAT_AGENT_MARKERS`: comma-separated user-agent substrings (default: `bot,crawler,scanner`)
//! - `TELEGRAM_CALLBACK_PATH`: path the callback normalizer watches
//! - `TRUST_PROXY_HEADERS`: read client address from `X-Forwarded-For` / `X-Real-IP`
//!
//! # Security Headers
//!
//! - `SECURE_HSTS_SECONDS`, `SECURE_HSTS_INCLUDE_SUBDOMAINS`, `SECURE_HSTS_PRELOAD`
//! - `SECURE_CONTENT_TYPE_NOSNIFF`, `X_FRAME_OPTIONS`

use std::env;

use crate::error::{AppError, AppResult};

/// Default path of the Telegram login callback.
pub const DEFAULT_TELEGRAM_CALLBACK_PATH: &str = "/accounts/telegram/login/callback/";

/// Path of the liveness endpoint.
pub const HEALTH_PATH: &str = "/health";

/// Allowed `X-Frame-Options` values (empty disables the header).
const FRAME_OPTIONS: [&str; 3] = ["DENY", "SAMEORIGIN", ""];

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (expected text or json)")),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8000)
    pub port: u16,

    /// Maximum request body size in bytes (default: 1 MiB).
    /// Also bounds how much the callback normalizer will buffer.
    pub max_request_body_size: usize,

    // =========================================================================
    // Host Canonicalization
    // =========================================================================
    /// Bare hostname that gets redirected (default: "greatideas.ru")
    pub bare_host: String,

    /// Canonical hostname used as redirect target (default: "www.greatideas.ru")
    pub canonical_host: String,

    // =========================================================================
    // Threat Signals
    // =========================================================================
    /// Lower-cased user-agent substrings associated with automated clients
    pub threat_agent_markers: Vec<String>,

    /// Whether `X-Forwarded-For` / `X-Real-IP` may supply the client address
    /// when the socket address is unavailable.
    /// Only enable behind a reverse proxy that overwrites these headers.
    pub trust_proxy_headers: bool,

    // =========================================================================
    // Telegram Login
    // =========================================================================
    /// Exact path of the Telegram login callback (case-sensitive)
    pub telegram_callback_path: String,

    // =========================================================================
    // Security Headers
    // =========================================================================
    /// HSTS max-age in seconds (0 = header disabled)
    pub hsts_seconds: u64,

    /// Append `includeSubDomains` to HSTS
    pub hsts_include_subdomains: bool,

    /// Append `preload` to HSTS
    pub hsts_preload: bool,

    /// Send `X-Content-Type-Options: nosniff`
    pub content_type_nosniff: bool,

    /// `X-Frame-Options` value (empty = header disabled)
    pub frame_options: String,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log output format
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8000)?,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,

            bare_host: Self::string_env("BARE_HOST", "greatideas.ru"),
            canonical_host: Self::string_env("CANONICAL_HOST", "www.greatideas.ru"),

            threat_agent_markers: Self::parse_markers(
                &env::var("THREAT_AGENT_MARKERS")
                    .unwrap_or_else(|_| "bot,crawler,scanner".to_string()),
            ),
            trust_proxy_headers: Self::parse_flag("TRUST_PROXY_HEADERS", false)?,

            telegram_callback_path: env::var("TELEGRAM_CALLBACK_PATH")
                .unwrap_or_else(|_| DEFAULT_TELEGRAM_CALLBACK_PATH.to_string()),

            hsts_seconds: Self::parse_env("SECURE_HSTS_SECONDS", 31_536_000)?,
            hsts_include_subdomains: Self::parse_flag("SECURE_HSTS_INCLUDE_SUBDOMAINS", true)?,
            hsts_preload: Self::parse_flag("SECURE_HSTS_PRELOAD", true)?,
            content_type_nosniff: Self::parse_flag("SECURE_CONTENT_TYPE_NOSNIFF", true)?,
            frame_options: env::var("X_FRAME_OPTIONS")
                .map(|v| v.trim().to_ascii_uppercase())
                .unwrap_or_else(|_| "DENY".to_string()),

            log_format: Self::parse_env("LOG_FORMAT", LogFormat::Text)?,
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    fn validate(&self) -> AppResult<()> {
        if !self.telegram_callback_path.starts_with('/') {
            return Err(AppError::ConfigError(format!(
                "TELEGRAM_CALLBACK_PATH must start with '/', got '{}'",
                self.telegram_callback_path
            )));
        }

        if self.telegram_callback_path.contains(['{', '}', '*']) {
            return Err(AppError::ConfigError(format!(
                "TELEGRAM_CALLBACK_PATH must be a literal path, got '{}'",
                self.telegram_callback_path
            )));
        }

        if self.telegram_callback_path == HEALTH_PATH {
            return Err(AppError::ConfigError(format!(
                "TELEGRAM_CALLBACK_PATH must not be {HEALTH_PATH}"
            )));
        }

        if self.bare_host.is_empty() || self.canonical_host.is_empty() {
            return Err(AppError::ConfigError(
                "BARE_HOST and CANONICAL_HOST must not be empty".to_string(),
            ));
        }

        if self.bare_host == self.canonical_host {
            return Err(AppError::ConfigError(
                "BARE_HOST must differ from CANONICAL_HOST (redirect loop)".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.threat_agent_markers.is_empty() {
            return Err(AppError::ConfigError(
                "THREAT_AGENT_MARKERS must contain at least one marker".to_string(),
            ));
        }

        if !FRAME_OPTIONS.contains(&self.frame_options.as_str()) {
            return Err(AppError::ConfigError(format!(
                "X_FRAME_OPTIONS must be DENY, SAMEORIGIN or empty, got '{}'",
                self.frame_options
            )));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Redirect target origin, e.g. `https://www.greatideas.ru`.
    pub fn canonical_origin(&self) -> String {
        format!("https://{}", self.canonical_host)
    }

    /// `Strict-Transport-Security` header value, or `None` when disabled.
    pub fn hsts_header_value(&self) -> Option<String> {
        if self.hsts_seconds == 0 {
            return None;
        }
        let mut value = format!("max-age={}", self.hsts_seconds);
        if self.hsts_include_subdomains {
            value.push_str("; includeSubDomains");
        }
        if self.hsts_preload {
            value.push_str("; preload");
        }
        Some(value)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a boolean flag, accepting `true`/`false` in any case plus `1`/`0`.
    fn parse_flag(name: &str, default: bool) -> AppResult<bool> {
        match env::var(name) {
            Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                other => Err(AppError::ConfigError(format!(
                    "Invalid {name}: expected true or false, got '{other}'"
                ))),
            },
            Err(_) => Ok(default),
        }
    }

    fn string_env(name: &str, default: &str) -> String {
        env::var(name)
            .ok()
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    /// Split a comma-separated marker list, lower-casing and dropping blanks.
    fn parse_markers(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_request_body_size: 1024 * 1024,
            bare_host: "greatideas.ru".to_string(),
            canonical_host: "www.greatideas.ru".to_string(),
            threat_agent_markers: vec![
                "bot".to_string(),
                "crawler".to_string(),
                "scanner".to_string(),
            ],
            trust_proxy_headers: false,
            telegram_callback_path: DEFAULT_TELEGRAM_CALLBACK_PATH.to_string(),
            hsts_seconds: 31_536_000,
            hsts_include_subdomains: true,
            hsts_preload: true,
            content_type_nosniff: true,
            frame_options: "DENY".to_string(),
            log_format: LogFormat::Text,
            metrics_port: 9090,
        }
    }
}
