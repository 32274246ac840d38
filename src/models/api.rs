use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "healthy" while the process is serving
    pub status: String,
    /// Crate version
    pub version: String,
    /// Seconds since startup
    pub uptime_seconds: u64,
    /// Time of the check
    pub timestamp: DateTime<Utc>,
}

/// Form body the Telegram callback endpoint accepts once normalized.
#[derive(Debug, Deserialize)]
pub struct CompositeCallbackForm {
    #[serde(rename = "tgAuthResult")]
    pub tg_auth_result: Option<String>,
}

/// Acknowledgement for an accepted login callback.
#[derive(Debug, Serialize)]
pub struct CallbackAccepted {
    pub status: &'static str,
    pub telegram_id: Option<String>,
    pub username: Option<String>,
}
