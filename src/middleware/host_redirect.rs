//! Canonical host redirect middleware.
//!
//! Requests addressed to the bare domain (`greatideas.ru`, any port) are
//! answered with `301 Moved Permanently` pointing at the same path and query
//! on the canonical origin (`https://www.greatideas.ru`). Every other host is
//! passed through untouched.
//!
//! This layer must be the outermost interceptor so redirected requests never
//! reach later stages.
//!
//! A malformed `Host` header is reported to the sink and treated as "not a
//! match": the request still goes downstream.

use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{HOST, LOCATION};
use axum::http::uri::{Authority, InvalidUri};
use axum::http::{HeaderValue, Request, Response, StatusCode};
use thiserror::Error;
use tower::{Layer, Service};

use crate::config::Config;
use crate::sink::{Interceptor, PipelineEvent, SharedSink};

/// Faults the host redirect can hit while inspecting a request.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Host header is not valid UTF-8")]
    NotUtf8,

    #[error("malformed Host header '{value}': {source}")]
    Malformed {
        value: String,
        #[source]
        source: InvalidUri,
    },

    #[error("cannot build redirect location '{0}'")]
    Location(String),
}

/// Layer that redirects the bare host to the canonical origin.
#[derive(Clone)]
pub struct HostRedirectLayer {
    bare_host: Arc<str>,
    canonical_origin: Arc<str>,
    sink: SharedSink,
}

impl HostRedirectLayer {
    /// Create a redirect layer.
    ///
    /// * `bare_host` - host (without port) that triggers the redirect
    /// * `canonical_origin` - scheme and host to redirect to, no trailing slash
    pub fn new(
        bare_host: impl Into<String>,
        canonical_origin: impl Into<String>,
        sink: SharedSink,
    ) -> Self {
        Self {
            bare_host: Arc::from(bare_host.into().to_ascii_lowercase()),
            canonical_origin: Arc::from(canonical_origin.into()),
            sink,
        }
    }

    pub fn from_config(config: &Config, sink: SharedSink) -> Self {
        Self::new(config.bare_host.clone(), config.canonical_origin(), sink)
    }
}

impl<S> Layer<S> for HostRedirectLayer {
    type Service = HostRedirectService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HostRedirectService {
            inner,
            bare_host: self.bare_host.clone(),
            canonical_origin: self.canonical_origin.clone(),
            sink: self.sink.clone(),
        }
    }
}

/// Host redirect service wrapper.
#[derive(Clone)]
pub struct HostRedirectService<S> {
    inner: S,
    bare_host: Arc<str>,
    canonical_origin: Arc<str>,
    sink: SharedSink,
}

impl<S> Service<Request<Body>> for HostRedirectService<S>
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
        match redirect_for(&req, &self.bare_host, &self.canonical_origin) {
            Ok(Some(redirect)) => {
                self.sink.record(PipelineEvent::HostRedirected {
                    host: redirect.host,
                    location: redirect.location_text,
                });
                let response = permanent_redirect(redirect.location);
                return Box::pin(async move { Ok(response) });
            }
            Ok(None) => {}
            Err(e) => self.sink.fault(Interceptor::HostRedirect, &e),
        }

        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(req).await })
    }
}

/// A redirect decision for a matching request.
struct Redirect {
    host: String,
    location: HeaderValue,
    location_text: String,
}

/// Decide whether `req` must be redirected.
///
/// `Ok(None)` means the host is not the bare host (or no host is known).
fn redirect_for<B>(
    req: &Request<B>,
    bare_host: &str,
    canonical_origin: &str,
) -> Result<Option<Redirect>, HostError> {
    let Some(host) = request_host(req)? else {
        return Ok(None);
    };
    if host != bare_host {
        return Ok(None);
    }

    // Path and query are carried over exactly as received.
    let full_path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|pq| !pq.is_empty())
        .unwrap_or("/");
    let location_text = format!("{canonical_origin}{full_path}");
    let location = HeaderValue::from_str(&location_text)
        .map_err(|_| HostError::Location(location_text.clone()))?;

    Ok(Some(Redirect {
        host,
        location,
        location_text,
    }))
}

/// Lower-cased host of the request with any port removed.
///
/// Reads the `Host` header, falling back to the URI authority (HTTP/2
/// `:authority`, absolute-form targets).
pub fn request_host<B>(req: &Request<B>) -> Result<Option<String>, HostError> {
    if let Some(value) = req.headers().get(HOST) {
        let raw = value.to_str().map_err(|_| HostError::NotUtf8)?;
        let authority = Authority::from_str(raw).map_err(|source| HostError::Malformed {
            value: raw.to_string(),
            source,
        })?;
        return Ok(Some(authority.host().to_ascii_lowercase()));
    }

    Ok(req.uri().host().map(str::to_ascii_lowercase))
}

fn permanent_redirect(location: HeaderValue) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
    response.headers_mut().insert(LOCATION, location);
    response
}
