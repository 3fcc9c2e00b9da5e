//! End-to-end runs against an in-process tracking stub.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use probe_core::{run_probe, HttpProber, ProbeConfig};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Seen {
    link_id: String,
    user_id: String,
    gaid: String,
    idfa: String,
    user_agent: String,
    forwarded_for: String,
}

#[derive(Clone)]
struct Stub {
    /// Requests from this sequence number on get the blocked-campaign page
    fraud_from: u32,
    /// Milliseconds to hold each response, given the sequence number
    delay: Arc<dyn Fn(u32) -> u64 + Send + Sync>,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Stub {
    fn new(fraud_from: u32) -> Self {
        Self {
            fraud_from,
            delay: Arc::new(|_: u32| 0u64),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

async fn track(
    State(stub): State<Stub>,
    Path(link_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let gaid = params.get("gaid").cloned().unwrap_or_default();
    let seq: u32 = gaid
        .strip_prefix("test-gaid-")
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);

    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    stub.seen.lock().unwrap().push(Seen {
        link_id,
        user_id: params.get("user_id").cloned().unwrap_or_default(),
        gaid: gaid.clone(),
        idfa: params.get("idfa").cloned().unwrap_or_default(),
        user_agent: header_str("user-agent"),
        forwarded_for: header_str("x-forwarded-for"),
    });

    let delay = (stub.delay)(seq);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    if seq >= stub.fraud_from {
        (
            StatusCode::OK,
            "<html><body>Campaign Not Available</body></html>",
        )
            .into_response()
    } else {
        (
            StatusCode::FOUND,
            [(header::LOCATION, "https://advertiser.example/landing")],
        )
            .into_response()
    }
}

async fn spawn_stub(stub: Stub) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/track/:link_id", get(track))
        .with_state(stub);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

fn config(server_url: String, requests: u32) -> ProbeConfig {
    let mut config = ProbeConfig::default();
    config.target.server_url = server_url;
    config.run.request_count = requests;
    config.validate().unwrap();
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rate_limit_boundary_run() {
    let stub = Stub::new(100);
    let seen = stub.seen.clone();
    let url = spawn_stub(stub).await;

    let config = config(url, 105);
    let prober = Arc::new(HttpProber::new(&config.target).unwrap());
    let run = run_probe(&config, "link-abc", prober).await.unwrap();

    assert_eq!(run.summary.total, 105);
    assert_eq!(run.summary.redirects, 99);
    assert_eq!(run.summary.fraud, 6);
    assert_eq!(run.summary.errors, 0);
    let expected: BTreeMap<u16, u64> = [(200, 6), (302, 99)].into_iter().collect();
    assert_eq!(run.summary.status_counts, expected);

    let seqs: Vec<u32> = run.results.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, (1..=105).collect::<Vec<_>>());
    assert!(run.results[99].body.contains("Campaign Not Available"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 105);
    for s in seen.iter() {
        assert_eq!(s.link_id, "link-abc");
        assert_eq!(s.user_agent, "curl/7.68.0");
        assert_eq!(s.forwarded_for, "192.168.1.100");
        let n = s.gaid.strip_prefix("test-gaid-").unwrap();
        assert_eq!(s.idfa, format!("test-idfa-{n}"));
        assert_eq!(s.user_id, format!("{}-{n}", run.user_prefix));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_report_order_ignores_completion_order() {
    let mut stub = Stub::new(u32::MAX);
    stub.delay = Arc::new(|seq: u32| 12u64.saturating_sub(seq as u64) * 20);
    let url = spawn_stub(stub).await;

    let config = config(url, 12);
    let prober = Arc::new(HttpProber::new(&config.target).unwrap());
    let run = run_probe(&config, "link", prober).await.unwrap();

    let seqs: Vec<u32> = run.results.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, (1..=12).collect::<Vec<_>>());
    assert_eq!(run.summary.redirects, 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_is_isolated() {
    let mut stub = Stub::new(u32::MAX);
    stub.delay = Arc::new(|seq: u32| if seq == 2 { 3_000u64 } else { 0 });
    let url = spawn_stub(stub).await;

    let mut config = config(url, 5);
    config.target.timeout_ms = 300;
    let prober = Arc::new(HttpProber::new(&config.target).unwrap());
    let run = run_probe(&config, "link", prober).await.unwrap();

    assert_eq!(run.results.len(), 5);
    assert_eq!(run.summary.errors, 1);
    assert_eq!(run.summary.redirects, 4);
    assert_eq!(run.summary.histogram_total() + run.summary.errors, 5);

    let timed_out = &run.results[1];
    assert_eq!(timed_out.seq, 2);
    assert!(!timed_out.success);
    assert_eq!(timed_out.status_code, None);
    assert!(timed_out.error.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connection_refused_is_not_fatal() {
    // Grab a free port, then close it again.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = config(format!("http://{addr}"), 25);
    config.target.timeout_ms = 2_000;
    let prober = Arc::new(HttpProber::new(&config.target).unwrap());
    let run = run_probe(&config, "link", prober).await.unwrap();

    assert_eq!(run.summary.errors, 25);
    assert_eq!(run.summary.redirects, 0);
    assert_eq!(run.summary.fraud, 0);
    assert!(run.summary.status_counts.is_empty());
    assert!(run
        .results
        .iter()
        .all(|r| !r.success && r.status_code.is_none() && r.body == *r.error.as_ref().unwrap()));
}
