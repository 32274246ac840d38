//! Telegram login callback normalization.
//!
//! The social-login handler behind this layer expects the Telegram result as
//! a single form field, `tgAuthResult`, holding the whole payload as JSON.
//! Clients do not always send that: the login widget posts a JSON body, and
//! the redirect flow re-posts the payload as flat form fields
//! (`id=..&hash=..&auth_date=..`). This layer rewrites both into the
//! composite form before the handler runs.
//!
//! # Decision Flow
//!
//! ```text
//! POST <callback path>? ──no──▶ pass through (body untouched)
//!        │ yes
//!        ▼
//! usable tgAuthResult already present? ──yes──▶ pass through
//!        │ no
//!        ▼
//! JSON body ──decoded, non-empty──▶ payload
//!        │ otherwise
//!        ▼
//! flat form fields ──▶ payload
//!        │
//!        ▼
//! id / hash / auth_date present? ──no──▶ pass through
//!        │ yes
//!        ▼
//! body := tgAuthResult=<json>, form content type, form cache invalidated
//! ```
//!
//! The layer never fails a request. Faults are reported to the sink and the
//! request continues in whatever state it had reached. A body that outgrows
//! the size limit while being buffered is forwarded with every byte intact
//! and left to the handler's own limit.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response};
use futures_util::StreamExt;
use futures_util::stream;
use http_body_util::BodyExt;
use thiserror::Error;
use tower::{Layer, Service};

use crate::config::Config;
use crate::models::callback::{
    COMPOSITE_FIELD, CallbackPayload, composite_is_usable, looks_like_object,
};
use crate::models::form::{CachedForm, FORM_CONTENT_TYPE, FormCache, FormFields, is_json};
use crate::sink::{Interceptor, PayloadSource, PipelineEvent, SharedSink};

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("failed to read callback body: {0}")]
    BodyRead(#[source] axum::Error),

    #[error("callback body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("failed to encode callback payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why a callback was left as received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A usable `tgAuthResult` field is already there.
    CompositePresent,
    /// No `id`, `hash` or `auth_date` anywhere in the payload.
    MissingProof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Unchanged(SkipReason),
    Rewritten(PayloadSource),
}

/// Body-level view of a callback request.
///
/// Holds the raw body, its content type, and the lazily parsed form view.
#[derive(Debug)]
pub struct CallbackRequest {
    content_type: Option<String>,
    body: Bytes,
    form: FormCache,
}

impl CallbackRequest {
    pub fn new(content_type: Option<String>, body: Bytes) -> Self {
        Self {
            content_type,
            body,
            form: FormCache::new(),
        }
    }

    /// Start from a form view another stage already parsed.
    pub fn with_cached_form(mut self, fields: FormFields) -> Self {
        self.form = FormCache::seeded(fields);
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Form view of the body, parsed on first use.
    pub fn form_fields(&self) -> &FormFields {
        self.form.get_or_parse(self.content_type.as_deref(), &self.body)
    }

    /// Rewrite the body into the composite form if it carries a login payload.
    pub fn normalize(&mut self) -> Result<Outcome, NormalizeError> {
        if self
            .form_fields()
            .get(COMPOSITE_FIELD)
            .is_some_and(composite_is_usable)
        {
            return Ok(Outcome::Unchanged(SkipReason::CompositePresent));
        }

        let (payload, source) = match self.json_payload() {
            Some(payload) if !payload.is_empty() => (payload, PayloadSource::JsonBody),
            _ => (
                CallbackPayload::from_form(self.form_fields()),
                PayloadSource::FormFields,
            ),
        };

        if !payload.has_proof() {
            return Ok(Outcome::Unchanged(SkipReason::MissingProof));
        }

        let json = payload.to_composite_json()?;
        self.body = Bytes::from(encode_composite(&json));
        self.content_type = Some(FORM_CONTENT_TYPE.to_string());
        self.form.invalidate();

        Ok(Outcome::Rewritten(source))
    }

    /// Payload decoded from a JSON-looking body; `None` if absent or undecodable.
    fn json_payload(&self) -> Option<CallbackPayload> {
        if is_json(self.content_type()) || looks_like_object(&self.body) {
            CallbackPayload::from_json_body(&self.body)
        } else {
            None
        }
    }
}

/// `tgAuthResult=<json>` as an urlencoded body.
pub fn encode_composite(json: &str) -> String {
    form_urlencoded::Serializer::new(String::new())
        .append_pair(COMPOSITE_FIELD, json)
        .finish()
}

/// Layer that normalizes Telegram login callbacks.
#[derive(Clone)]
pub struct CallbackNormalizerLayer {
    callback_path: Arc<str>,
    max_body_size: usize,
    sink: SharedSink,
}

impl CallbackNormalizerLayer {
    pub fn new(callback_path: impl Into<String>, max_body_size: usize, sink: SharedSink) -> Self {
        Self {
            callback_path: Arc::from(callback_path.into()),
            max_body_size,
            sink,
        }
    }

    pub fn from_config(config: &Config, sink: SharedSink) -> Self {
        Self::new(
            config.telegram_callback_path.clone(),
            config.max_request_body_size,
            sink,
        )
    }
}

impl<S> Layer<S> for CallbackNormalizerLayer {
    type Service = CallbackNormalizerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CallbackNormalizerService {
            inner,
            callback_path: self.callback_path.clone(),
            max_body_size: self.max_body_size,
            sink: self.sink.clone(),
        }
    }
}

/// Callback normalizer service wrapper.
#[derive(Clone)]
pub struct CallbackNormalizerService<S> {
    inner: S,
    callback_path: Arc<str>,
    max_body_size: usize,
    sink: SharedSink,
}

impl<S> Service<Request<Body>> for CallbackNormalizerService<S>
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
        let mut inner = self.inner.clone();

        // Exact, case-sensitive match; every other request keeps its body stream.
        if req.method() != Method::POST || req.uri().path() != &*self.callback_path {
            return Box::pin(async move { inner.call(req).await });
        }

        let max_body_size = self.max_body_size;
        let sink = self.sink.clone();

        Box::pin(async move {
            let req = normalize_request(req, max_body_size, &sink).await;
            inner.call(req).await
        })
    }
}

/// Buffer the body, normalize it, and rebuild the request.
async fn normalize_request(
    req: Request<Body>,
    max_body_size: usize,
    sink: &SharedSink,
) -> Request<Body> {
    if declared_length(req.headers()).is_some_and(|len| len > max_body_size) {
        return req;
    }

    let (mut parts, body) = req.into_parts();
    let bytes = match buffer_body(body, max_body_size).await {
        Buffered::Complete(bytes) => bytes,
        Buffered::Passthrough(body, e) => {
            sink.fault(Interceptor::CallbackNormalizer, &e);
            return Request::from_parts(parts, body);
        }
    };

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut view = CallbackRequest::new(content_type, bytes);
    if let Some(CachedForm(fields)) = parts.extensions.get::<CachedForm>() {
        view = view.with_cached_form(fields.clone());
    }

    match view.normalize() {
        Ok(Outcome::Rewritten(source)) => {
            parts
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
            parts
                .headers
                .insert(CONTENT_LENGTH, HeaderValue::from(view.body().len()));
            // The new body has a fixed length and is no longer chunked.
            parts.headers.remove(TRANSFER_ENCODING);
            // The earlier stage's view describes the old body.
            parts.extensions.remove::<CachedForm>();
            sink.record(PipelineEvent::CallbackNormalized { source });
        }
        Ok(Outcome::Unchanged(_)) => {}
        Err(e) => sink.fault(Interceptor::CallbackNormalizer, &e),
    }

    Request::from_parts(parts, Body::from(view.into_body()))
}

enum Buffered {
    Complete(Bytes),
    /// Buffering stopped early; the body still yields every byte received.
    Passthrough(Body, NormalizeError),
}

/// Read the body frame by frame, stopping once `limit` is exceeded.
async fn buffer_body(mut body: Body, limit: usize) -> Buffered {
    let mut buf = Vec::new();
    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                let Ok(data) = frame.into_data() else {
                    continue;
                };
                buf.extend_from_slice(&data);
                if buf.len() > limit {
                    return Buffered::Passthrough(
                        resume(buf, body),
                        NormalizeError::TooLarge { limit },
                    );
                }
            }
            Err(e) => {
                return Buffered::Passthrough(resume(buf, body), NormalizeError::BodyRead(e));
            }
        }
    }
    Buffered::Complete(Bytes::from(buf))
}

/// Body made of the bytes already read followed by the unread rest.
fn resume(head: Vec<u8>, rest: Body) -> Body {
    let head = stream::once(async move { Ok::<_, axum::Error>(Bytes::from(head)) });
    Body::from_stream(head.chain(rest.into_data_stream()))
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::form::RequestFormExt;
    use crate::sink::MemorySink;
    use serde_json::{Value, json};
    use std::convert::Infallible;
    use std::sync::Mutex;
    use tower::{ServiceExt, service_fn};

    const PATH: &str = "/accounts/telegram/login/callback/";

    fn composite_json(body: &[u8]) -> Value {
        let fields = FormFields::parse(body);
        serde_json::from_str(fields.get(COMPOSITE_FIELD).unwrap()).unwrap()
    }

    #[test]
    fn test_json_body_rewritten() {
        let mut view = CallbackRequest::new(
            Some("application/json".to_string()),
            Bytes::from_static(br#"{"id": "42", "hash": "abc", "auth_date": "100"}"#),
        );

        assert_eq!(
            view.normalize().unwrap(),
            Outcome::Rewritten(PayloadSource::JsonBody)
        );
        assert_eq!(view.content_type(), Some(FORM_CONTENT_TYPE));
        assert_eq!(
            composite_json(view.body()),
            json!({"id": "42", "hash": "abc", "auth_date": "100"})
        );
    }

    #[test]
    fn test_json_detected_by_braces_without_content_type() {
        let mut view = CallbackRequest::new(
            Some("text/plain".to_string()),
            Bytes::from_static(b"  {\"id\": 7}\n"),
        );

        assert_eq!(
            view.normalize().unwrap(),
            Outcome::Rewritten(PayloadSource::JsonBody)
        );
        assert_eq!(composite_json(view.body()), json!({"id": 7}));
    }

    #[test]
    fn test_flat_fields_rewritten() {
        let mut view = CallbackRequest::new(
            Some(FORM_CONTENT_TYPE.to_string()),
            Bytes::from_static(b"id=42&hash=abc&auth_date=100"),
        );

        assert_eq!(
            view.normalize().unwrap(),
            Outcome::Rewritten(PayloadSource::FormFields)
        );
        assert_eq!(
            composite_json(view.body()),
            json!({"id": "42", "hash": "abc", "auth_date": "100"})
        );
    }

    #[test]
    fn test_undecodable_json_falls_back_to_form() {
        // Braces trigger a JSON attempt; it fails and the form view has nothing.
        let mut view = CallbackRequest::new(
            Some("application/json".to_string()),
            Bytes::from_static(b"{\"id\": }"),
        );

        assert_eq!(
            view.normalize().unwrap(),
            Outcome::Unchanged(SkipReason::MissingProof)
        );
        assert_eq!(view.body().as_ref(), b"{\"id\": }");
    }

    #[test]
    fn test_payload_without_proof_untouched_twice() {
        let body = Bytes::from_static(b"username=foo");
        let mut view = CallbackRequest::new(Some(FORM_CONTENT_TYPE.to_string()), body.clone());

        for _ in 0..2 {
            assert_eq!(
                view.normalize().unwrap(),
                Outcome::Unchanged(SkipReason::MissingProof)
            );
            assert_eq!(view.body(), &body);
            assert_eq!(view.content_type(), Some(FORM_CONTENT_TYPE));
        }
    }

    #[test]
    fn test_already_normalized_is_stable() {
        let mut view = CallbackRequest::new(
            Some("application/json".to_string()),
            Bytes::from_static(br#"{"id": "42", "hash": "abc"}"#),
        );
        view.normalize().unwrap();
        let once = view.body().clone();

        assert_eq!(
            view.normalize().unwrap(),
            Outcome::Unchanged(SkipReason::CompositePresent)
        );
        assert_eq!(view.body(), &once);
    }

    #[test]
    fn test_false_composite_treated_as_absent() {
        let mut view = CallbackRequest::new(
            Some(FORM_CONTENT_TYPE.to_string()),
            Bytes::from_static(b"tgAuthResult=false&id=5&hash=h"),
        );

        assert_eq!(
            view.normalize().unwrap(),
            Outcome::Rewritten(PayloadSource::FormFields)
        );
        assert_eq!(composite_json(view.body()), json!({"id": "5", "hash": "h"}));
    }

    #[test]
    fn test_broken_composite_treated_as_absent() {
        let mut view = CallbackRequest::new(
            Some(FORM_CONTENT_TYPE.to_string()),
            Bytes::from(format!("{}&auth_date=9", encode_composite("{\"id\":"))),
        );

        assert_eq!(
            view.normalize().unwrap(),
            Outcome::Rewritten(PayloadSource::FormFields)
        );
    }

    #[test]
    fn test_seeded_cache_composite_wins_over_body() {
        let seeded: FormFields = [(COMPOSITE_FIELD, r#"{"id": 1}"#)].into_iter().collect();
        let mut view = CallbackRequest::new(
            Some("application/json".to_string()),
            Bytes::from_static(br#"{"id": "2", "hash": "x"}"#),
        )
        .with_cached_form(seeded);

        assert_eq!(
            view.normalize().unwrap(),
            Outcome::Unchanged(SkipReason::CompositePresent)
        );
    }

    #[test]
    fn test_rewrite_invalidates_form_cache() {
        let mut view = CallbackRequest::new(
            Some(FORM_CONTENT_TYPE.to_string()),
            Bytes::from_static(b"id=42&hash=abc"),
        );
        assert_eq!(view.form_fields().get("id"), Some("42"));

        view.normalize().unwrap();

        assert_eq!(view.form_fields().get("id"), None);
        assert!(view.form_fields().get(COMPOSITE_FIELD).is_some());
    }

    #[test]
    fn test_encode_composite_escapes_json() {
        assert_eq!(
            encode_composite(r#"{"a": "b c"}"#),
            "tgAuthResult=%7B%22a%22%3A+%22b+c%22%7D"
        );
    }

    /// Run one request through the layer and capture what the inner service saw.
    async fn run(req: Request<Body>) -> (Request<Bytes>, Arc<MemorySink>) {
        let sink = MemorySink::new();
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        let inner = service_fn(move |req: Request<Body>| {
            let slot = slot.clone();
            async move {
                let (parts, body) = req.into_parts();
                let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
                *slot.lock().unwrap() = Some(Request::from_parts(parts, bytes));
                Ok::<_, Infallible>(Response::new(Body::empty()))
            }
        });

        CallbackNormalizerLayer::new(PATH, 1024, sink.clone())
            .layer(inner)
            .oneshot(req)
            .await
            .unwrap();

        let captured = seen.lock().unwrap().take().unwrap();
        (captured, sink)
    }

    #[tokio::test]
    async fn test_layer_rewrites_headers_and_drops_cached_form() {
        let body = r#"{"id": "42", "hash": "abc", "auth_date": "100"}"#;
        let mut req = Request::builder()
            .method(Method::POST)
            .uri(PATH)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap();
        req.cache_form(FormFields::default());

        let (seen, sink) = run(req).await;

        assert_eq!(seen.headers()[CONTENT_TYPE], FORM_CONTENT_TYPE);
        assert_eq!(
            seen.headers()[CONTENT_LENGTH],
            seen.body().len().to_string().as_str()
        );
        assert!(seen.cached_form().is_none());
        assert_eq!(
            composite_json(seen.body()),
            json!({"id": "42", "hash": "abc", "auth_date": "100"})
        );
        assert_eq!(
            sink.events(),
            vec![PipelineEvent::CallbackNormalized {
                source: PayloadSource::JsonBody
            }]
        );
    }

    #[tokio::test]
    async fn test_layer_ignores_other_paths_and_methods() {
        let body = r#"{"id": "42"}"#;
        for (method, uri) in [
            (Method::POST, "/accounts/telegram/login/callback"),
            (Method::POST, "/Accounts/telegram/login/callback/"),
            (Method::GET, PATH),
        ] {
            let req = Request::builder()
                .method(method)
                .uri(uri)
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap();

            let (seen, sink) = run(req).await;

            assert_eq!(seen.body().as_ref(), body.as_bytes());
            assert_eq!(seen.headers()[CONTENT_TYPE], "application/json");
            assert!(sink.events().is_empty());
        }
    }

    #[tokio::test]
    async fn test_layer_oversized_body_passes_through() {
        let body = format!("id=1&hash={}", "a".repeat(2048));
        let req = Request::builder()
            .method(Method::POST)
            .uri(PATH)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header(CONTENT_LENGTH, body.len())
            .body(Body::from(body.clone()))
            .unwrap();

        let (seen, sink) = run(req).await;

        assert_eq!(seen.body().as_ref(), body.as_bytes());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_layer_body_over_limit_forwarded_intact() {
        // No Content-Length, so the limit is only hit while buffering.
        let body = format!("id=1&hash={}", "a".repeat(2048));
        let req = Request::builder()
            .method(Method::POST)
            .uri(PATH)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(Body::from(body.clone()))
            .unwrap();

        let (seen, sink) = run(req).await;

        assert_eq!(seen.body().as_ref(), body.as_bytes());
        assert_eq!(seen.headers()[CONTENT_TYPE], FORM_CONTENT_TYPE);
        assert_eq!(
            sink.events(),
            vec![PipelineEvent::InterceptorFault {
                interceptor: Interceptor::CallbackNormalizer,
                error: "callback body exceeds 1024 bytes".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_layer_streamed_body_over_limit_keeps_every_chunk() {
        let chunks: Vec<Result<Bytes, Infallible>> = (0..8)
            .map(|i| Ok(Bytes::from(format!("k{i}={}&", "v".repeat(200)))))
            .collect();
        let expected: Vec<u8> = chunks
            .iter()
            .flat_map(|c| c.as_ref().unwrap().to_vec())
            .collect();
        let req = Request::builder()
            .method(Method::POST)
            .uri(PATH)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(Body::from_stream(futures_util::stream::iter(chunks)))
            .unwrap();

        let (seen, sink) = run(req).await;

        assert_eq!(seen.body().as_ref(), expected.as_slice());
        assert_eq!(sink.faults(), 1);
    }

    #[tokio::test]
    async fn test_layer_rewrite_drops_transfer_encoding() {
        let body = "id=42&hash=abc";
        let req = Request::builder()
            .method(Method::POST)
            .uri(PATH)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header(TRANSFER_ENCODING, "chunked")
            .body(Body::from(body))
            .unwrap();

        let (seen, sink) = run(req).await;

        assert!(seen.headers().get(TRANSFER_ENCODING).is_none());
        assert_eq!(
            seen.headers()[CONTENT_LENGTH],
            seen.body().len().to_string().as_str()
        );
        assert_eq!(
            composite_json(seen.body()),
            json!({"id": "42", "hash": "abc"})
        );
        assert_eq!(sink.events().len(), 1);
    }
}
