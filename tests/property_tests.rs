//! Property tests for the interceptor pipeline.
//!
//! Each property drives a single layer against a recording continuation and
//! checks the invariant for arbitrary hosts, paths, user-agents and bodies.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_TYPE, HOST, LOCATION, USER_AGENT};
use axum::http::{Method, Request, Response, StatusCode};
use greatideas_edge::config::DEFAULT_TELEGRAM_CALLBACK_PATH;
use greatideas_edge::middleware::{
    AgentMarkers, CallbackNormalizerLayer, HostRedirectLayer, ThreatSignalLayer,
};
use greatideas_edge::{MemorySink, PipelineEvent};
use proptest::prelude::*;
use tower::util::BoxCloneService;
use tower::{Layer, ServiceExt, service_fn};

type Seen = Arc<Mutex<Vec<(Option<String>, Bytes)>>>;

type Continuation = BoxCloneService<Request<Body>, Response<Body>, Infallible>;

/// Continuation that records what reached it and answers `200 OK`.
fn recorder(seen: Seen) -> Continuation {
    BoxCloneService::new(service_fn(move |req: Request<Body>| {
        let seen = seen.clone();
        async move {
            let content_type = req
                .headers()
                .get(CONTENT_TYPE)
                .map(|v| v.to_str().unwrap().to_string());
            let body = axum::body::to_bytes(req.into_body(), usize::MAX)
                .await
                .unwrap();
            seen.lock().unwrap().push((content_type, body));
            Ok::<_, Infallible>(Response::new(Body::empty()))
        }
    }))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// Strategy: path made of safe segments
fn arb_path() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z0-9_-]{1,12}", 0..4)
        .prop_map(|segments| format!("/{}", segments.join("/")))
}

// Strategy: optional query string
fn arb_query() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[a-z]{1,6}=[a-zA-Z0-9]{0,10}(&[a-z]{1,6}=[a-z0-9]{0,6}){0,3}")
}

// Strategy: hosts that are never the bare host
fn arb_other_host() -> impl Strategy<Value = String> {
    "[a-z]{1,10}\\.(ru|com|org)".prop_filter("bare host", |h| h != "greatideas.ru")
}

fn arb_port() -> impl Strategy<Value = Option<u16>> {
    prop::option::of(1u16..=u16::MAX)
}

fn with_port(host: &str, port: Option<u16>) -> String {
    match port {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn target(path: &str, query: &Option<String>) -> String {
    match query {
        Some(q) => format!("{path}?{q}"),
        None => path.to_string(),
    }
}

proptest! {
    /// Property: every bare-host request is answered with a 301 to the same
    /// path and query on the canonical origin, without calling downstream.
    #[test]
    fn proptest_bare_host_always_redirects(
        path in arb_path(),
        query in arb_query(),
        port in arb_port(),
        upper in any::<bool>(),
    ) {
        let host = if upper { "GREATIDEAS.RU" } else { "greatideas.ru" };
        let uri = target(&path, &query);
        let seen: Seen = Arc::default();
        let sink = MemorySink::new();

        let response = runtime().block_on(
            HostRedirectLayer::new("greatideas.ru", "https://www.greatideas.ru", sink.clone())
                .layer(recorder(seen.clone()))
                .oneshot(
                    Request::builder()
                        .uri(uri.as_str())
                        .header(HOST, with_port(host, port))
                        .body(Body::empty())
                        .unwrap(),
                ),
        ).unwrap();

        prop_assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        prop_assert_eq!(
            response.headers()[LOCATION].to_str().unwrap(),
            format!("https://www.greatideas.ru{uri}")
        );
        prop_assert!(seen.lock().unwrap().is_empty());
        prop_assert_eq!(sink.faults(), 0);
    }

    /// Property: any other host passes through exactly once, untouched.
    #[test]
    fn proptest_other_hosts_are_transparent(
        host in arb_other_host(),
        port in arb_port(),
        path in arb_path(),
    ) {
        let seen: Seen = Arc::default();
        let sink = MemorySink::new();

        let response = runtime().block_on(
            HostRedirectLayer::new("greatideas.ru", "https://www.greatideas.ru", sink.clone())
                .layer(recorder(seen.clone()))
                .oneshot(
                    Request::builder()
                        .uri(path.as_str())
                        .header(HOST, with_port(&host, port))
                        .body(Body::from("payload"))
                        .unwrap(),
                ),
        ).unwrap();

        prop_assert_eq!(response.status(), StatusCode::OK);
        let seen = seen.lock().unwrap();
        prop_assert_eq!(seen.len(), 1);
        prop_assert_eq!(seen[0].1.as_ref(), b"payload");
        prop_assert!(sink.events().is_empty());
    }

    /// Property: a marker anywhere in the user-agent, in any case, yields
    /// exactly one threat entry; downstream is always called exactly once.
    #[test]
    fn proptest_threat_signal_once_per_request(
        prefix in "[a-zA-Z0-9 /.;()]{0,20}",
        suffix in "[a-zA-Z0-9 /.;()]{0,20}",
        marker in prop_oneof![Just("bot"), Just("crawler"), Just("scanner")],
        flip_case in any::<bool>(),
    ) {
        let marker = if flip_case { marker.to_uppercase() } else { marker.to_string() };
        let user_agent = format!("{prefix}{marker}{suffix}");
        let seen: Seen = Arc::default();
        let sink = MemorySink::new();

        runtime().block_on(
            ThreatSignalLayer::new(AgentMarkers::default(), false, sink.clone())
                .layer(recorder(seen.clone()))
                .oneshot(
                    Request::builder()
                        .header(USER_AGENT, user_agent.as_str())
                        .body(Body::empty())
                        .unwrap(),
                ),
        ).unwrap();

        prop_assert_eq!(seen.lock().unwrap().len(), 1);
        prop_assert_eq!(
            sink.events(),
            vec![PipelineEvent::SuspiciousUserAgent {
                user_agent,
                client_addr: "unknown".to_string(),
            }]
        );
    }

    /// Property: user-agents without any marker produce no entry.
    #[test]
    fn proptest_clean_agents_silent(user_agent in "[ac-km-rt-z0-9 /.;()]{0,40}") {
        // No b, l or s anywhere, so no marker can appear
        let seen: Seen = Arc::default();
        let sink = MemorySink::new();

        runtime().block_on(
            ThreatSignalLayer::new(AgentMarkers::default(), false, sink.clone())
                .layer(recorder(seen.clone()))
                .oneshot(
                    Request::builder()
                        .header(USER_AGENT, user_agent.as_str())
                        .body(Body::empty())
                        .unwrap(),
                ),
        ).unwrap();

        prop_assert_eq!(seen.lock().unwrap().len(), 1);
        prop_assert!(sink.events().is_empty());
    }

    /// Property: outside the callback path, the body and content type reach
    /// downstream byte-for-byte, whatever they contain.
    #[test]
    fn proptest_normalizer_ignores_other_paths(
        path in arb_path().prop_filter("callback path", |p| p != DEFAULT_TELEGRAM_CALLBACK_PATH),
        body in prop::collection::vec(any::<u8>(), 0..256),
        json in any::<bool>(),
    ) {
        let content_type = if json { "application/json" } else { "application/x-www-form-urlencoded" };
        let seen: Seen = Arc::default();
        let sink = MemorySink::new();

        runtime().block_on(
            CallbackNormalizerLayer::new(DEFAULT_TELEGRAM_CALLBACK_PATH, 1024, sink.clone())
                .layer(recorder(seen.clone()))
                .oneshot(
                    Request::builder()
                        .method(Method::POST)
                        .uri(path.as_str())
                        .header(CONTENT_TYPE, content_type)
                        .body(Body::from(body.clone()))
                        .unwrap(),
                ),
        ).unwrap();

        let seen = seen.lock().unwrap();
        prop_assert_eq!(seen.len(), 1);
        prop_assert_eq!(seen[0].0.as_deref(), Some(content_type));
        prop_assert_eq!(seen[0].1.as_ref(), body.as_slice());
        prop_assert!(sink.events().is_empty());
    }
}
