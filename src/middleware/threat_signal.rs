//! User-agent threat signal middleware.
//!
//! Flags requests whose `User-Agent` contains a low-trust marker (by default
//! `bot`, `crawler` or `scanner`, matched case-insensitively) by emitting one
//! structured entry with the raw user-agent and the client address.
//!
//! This layer is an observer only: it never modifies the request, never
//! answers on its own, and always calls the inner service exactly once.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::USER_AGENT;
use axum::http::{Request, Response};
use thiserror::Error;
use tower::{Layer, Service};

use super::ip::client_addr;
use crate::config::Config;
use crate::sink::{Interceptor, PipelineEvent, SharedSink};

#[derive(Debug, Error)]
pub enum HeaderReadError {
    #[error("User-Agent header is not valid UTF-8")]
    UserAgentNotUtf8,
}

/// Case-insensitive substring matcher over a fixed marker set.
#[derive(Debug, Clone)]
pub struct AgentMarkers {
    markers: Arc<[String]>,
}

impl AgentMarkers {
    pub fn new<I, T>(markers: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.as_ref().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// True when the lower-cased `user_agent` contains any marker.
    pub fn matches(&self, user_agent: &str) -> bool {
        let lowered = user_agent.to_lowercase();
        self.markers.iter().any(|m| lowered.contains(m.as_str()))
    }
}

impl Default for AgentMarkers {
    fn default() -> Self {
        Self::new(["bot", "crawler", "scanner"])
    }
}

/// Layer that reports suspicious user-agents.
#[derive(Clone)]
pub struct ThreatSignalLayer {
    markers: AgentMarkers,
    trust_proxy_headers: bool,
    sink: SharedSink,
}

impl ThreatSignalLayer {
    pub fn new(markers: AgentMarkers, trust_proxy_headers: bool, sink: SharedSink) -> Self {
        Self {
            markers,
            trust_proxy_headers,
            sink,
        }
    }

    pub fn from_config(config: &Config, sink: SharedSink) -> Self {
        Self::new(
            AgentMarkers::new(&config.threat_agent_markers),
            config.trust_proxy_headers,
            sink,
        )
    }
}

impl<S> Layer<S> for ThreatSignalLayer {
    type Service = ThreatSignalService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ThreatSignalService {
            inner,
            markers: self.markers.clone(),
            trust_proxy_headers: self.trust_proxy_headers,
            sink: self.sink.clone(),
        }
    }
}

/// Threat signal service wrapper.
#[derive(Clone)]
pub struct ThreatSignalService<S> {
    inner: S,
    markers: AgentMarkers,
    trust_proxy_headers: bool,
    sink: SharedSink,
}

impl<S> ThreatSignalService<S> {
    fn inspect<B>(&self, req: &Request<B>) {
        let Some(value) = req.headers().get(USER_AGENT) else {
            return;
        };
        // Undecodable bytes are replaced, so markers around them still match.
        let user_agent = String::from_utf8_lossy(value.as_bytes());

        if self.markers.matches(&user_agent) {
            self.sink.record(PipelineEvent::SuspiciousUserAgent {
                user_agent: user_agent.into_owned(),
                client_addr: client_addr(req, self.trust_proxy_headers).into_owned(),
            });
        }
        if std::str::from_utf8(value.as_bytes()).is_err() {
            self.sink
                .fault(Interceptor::ThreatSignal, &HeaderReadError::UserAgentNotUtf8);
        }
    }
}

impl<S> Service<Request<Body>> for ThreatSignalService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        self.inspect(&req);

        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(req).await })
    }
}
