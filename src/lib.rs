//! # greatideas edge
//!
//! The HTTP edge of the greatideas marketplace: an ordered chain of request
//! interceptors in front of the application routes.
//!
//! - **Host canonicalization**: bare domain permanently redirected to `www`
//! - **Threat signals**: structured log entries for automated user-agents
//! - **Telegram login normalization**: widget JSON and flat form re-posts
//!   rewritten into the single `tgAuthResult` field the login handler reads
//! - **Security headers**: HSTS, `nosniff` and `X-Frame-Options`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Security Headers → Trace                                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Host Redirect → Threat Signal → Callback Normalizer        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, telegram callback)                       │
//! └─────────────────────────────────────────────────────────────┘
//!            │ events and faults
//!            ▼
//!      LogSink (tracing + Prometheus counters)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use greatideas_edge::{AppState, Config, TracingSink, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config);
//!     let app = build_router(state, TracingSink::shared())?;
//!
//!     // Serve with `into_make_service_with_connect_info::<SocketAddr>()`...
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod sink;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use routes::{apply_pipeline, build_router};
pub use sink::{LogSink, MemorySink, PipelineEvent, SharedSink, TracingSink};
pub use state::AppState;
