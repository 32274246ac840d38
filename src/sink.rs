//! Log sink capability shared by the interceptors.
//!
//! Interceptors never call the logging facade directly. They report
//! [`PipelineEvent`]s to an injected [`LogSink`], which keeps the pipeline
//! testable: production wires in [`TracingSink`], tests wire in
//! [`MemorySink`] and assert on exactly what was emitted.
//!
//! A sink must never fail or panic; interceptors rely on reporting being
//! infallible.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use crate::metrics;

/// Which interceptor produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interceptor {
    HostRedirect,
    ThreatSignal,
    CallbackNormalizer,
}

impl Interceptor {
    /// Stable name used in log fields and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Interceptor::HostRedirect => "host_redirect",
            Interceptor::ThreatSignal => "threat_signal",
            Interceptor::CallbackNormalizer => "callback_normalizer",
        }
    }
}

impl fmt::Display for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a normalized callback payload was assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    /// Decoded from a JSON request body.
    JsonBody,
    /// Assembled from flat form fields.
    FormFields,
}

impl PayloadSource {
    pub fn as_str(self) -> &'static str {
        match self {
            PayloadSource::JsonBody => "json_body",
            PayloadSource::FormFields => "form_fields",
        }
    }
}

/// One structured entry emitted by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A bare-host request was answered with a permanent redirect.
    HostRedirected { host: String, location: String },
    /// A user-agent matched a low-trust marker.
    SuspiciousUserAgent {
        user_agent: String,
        client_addr: String,
    },
    /// The callback body was rewritten into the composite field.
    CallbackNormalized { source: PayloadSource },
    /// An interceptor absorbed an internal fault and let the request through.
    InterceptorFault {
        interceptor: Interceptor,
        error: String,
    },
}

/// Destination for pipeline events.
pub trait LogSink: Send + Sync + 'static {
    /// Record an event. Must not panic.
    fn record(&self, event: PipelineEvent);

    /// Record an absorbed fault from `interceptor`.
    fn fault(&self, interceptor: Interceptor, error: &dyn std::error::Error) {
        self.record(PipelineEvent::InterceptorFault {
            interceptor,
            error: error.to_string(),
        });
    }
}

/// Shared handle to a sink, as held by every layer.
pub type SharedSink = Arc<dyn LogSink>;

/// Production sink: structured `tracing` events plus Prometheus counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn shared() -> SharedSink {
        Arc::new(Self)
    }
}

impl LogSink for TracingSink {
    fn record(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::HostRedirected { host, location } => {
                info!(host = %host, location = %location, "Redirecting to canonical host");
                metrics::record_host_redirect();
            }
            PipelineEvent::SuspiciousUserAgent {
                user_agent,
                client_addr,
            } => {
                warn!(
                    user_agent = %user_agent,
                    client_addr = %client_addr,
                    "Suspicious User-Agent"
                );
                metrics::record_threat_signal();
            }
            PipelineEvent::CallbackNormalized { source } => {
                debug!(
                    source = source.as_str(),
                    "Telegram callback rewritten to tgAuthResult form field"
                );
                metrics::record_callback_normalized(source.as_str());
            }
            PipelineEvent::InterceptorFault { interceptor, error } => {
                error!(interceptor = %interceptor, error = %error, "Interceptor fault absorbed");
                metrics::record_interceptor_fault(interceptor.as_str());
            }
        }
    }
}

/// In-memory sink that keeps every event, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of recorded threat signals.
    pub fn threat_signals(&self) -> usize {
        self.count(|e| matches!(e, PipelineEvent::SuspiciousUserAgent { .. }))
    }

    /// Number of recorded faults.
    pub fn faults(&self) -> usize {
        self.count(|e| matches!(e, PipelineEvent::InterceptorFault { .. }))
    }

    fn count(&self, pred: impl Fn(&PipelineEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|e| pred(e))
            .count()
    }
}

impl LogSink for MemorySink {
    fn record(&self, event: PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
