//! Request interceptors that run ahead of the application handlers.
//!
//! - **Host Redirect**: bare domain to canonical origin, `301` short-circuit
//! - **Threat Signal**: logs requests from automated-looking user-agents
//! - **Callback Normalizer**: rewrites Telegram login payloads into the single
//!   `tgAuthResult` form field the login handler reads
//!
//! # Architecture
//!
//! ```text
//! Request → Host Redirect → Threat Signal → Callback Normalizer → Handler
//!               ↓                ↓                  ↓
//!          301 Location     log entry        body rewritten
//! ```
//!
//! # Failure Model
//!
//! Interceptors never fail a request. Faults are reported through the
//! injected [`LogSink`](crate::sink::LogSink) and the request continues to
//! the next stage. The only early response is the host redirect itself.

pub mod callback_normalizer;
pub mod host_redirect;
pub mod ip;
pub mod threat_signal;

pub use callback_normalizer::{
    CallbackNormalizerLayer, CallbackRequest, NormalizeError, Outcome, SkipReason,
};
pub use host_redirect::{HostError, HostRedirectLayer, request_host};
pub use ip::{UNKNOWN_IP, client_addr};
pub use threat_signal::{AgentMarkers, HeaderReadError, ThreatSignalLayer};
