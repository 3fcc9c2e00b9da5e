use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

use crate::config::TargetConfig;
use crate::request::TrackRequest;
use crate::summary::FRAUD_MARKER;

/// Characters of the response body kept per result.
pub const BODY_PREVIEW_CHARS: usize = 200;

/// Outcome of one tracking request. A transport failure is still a result:
/// `success` is false, `status_code` is absent and `body` holds the error text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub seq: u32,
    pub status_code: Option<u16>,
    pub body: String,
    pub elapsed_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn response(seq: u32, status_code: u16, body: &str, elapsed_ms: u64) -> Self {
        Self {
            seq,
            status_code: Some(status_code),
            body: truncate_chars(body, BODY_PREVIEW_CHARS),
            elapsed_ms,
            success: true,
            error: None,
        }
    }

    pub fn transport_error(seq: u32, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            seq,
            status_code: None,
            body: error.clone(),
            elapsed_ms: 0,
            success: false,
            error: Some(error),
        }
    }
}

/// Seam between the harness and whatever answers the tracking requests.
/// Implementations must not fail: errors are folded into the result.
pub trait TrackProber: Send + Sync {
    fn name(&self) -> &'static str;

    fn probe<'a>(
        &'a self,
        req: &'a TrackRequest,
    ) -> Pin<Box<dyn Future<Output = ProbeResult> + Send + 'a>>;
}

/// Issues `GET {server_url}/track/{link_id}` over HTTP.
pub struct HttpProber {
    client: reqwest::Client,
    server_url: String,
}

impl HttpProber {
    pub fn new(target: &TargetConfig) -> Result<Self> {
        // Redirects are the signal being measured, so they are never followed.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(target.timeout_ms))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            server_url: target.server_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, link_id: &str) -> String {
        format!("{}/track/{}", self.server_url, link_id)
    }
}

impl TrackProber for HttpProber {
    fn name(&self) -> &'static str {
        "http"
    }

    fn probe<'a>(
        &'a self,
        req: &'a TrackRequest,
    ) -> Pin<Box<dyn Future<Output = ProbeResult> + Send + 'a>> {
        Box::pin(async move {
            let start = Instant::now();
            let endpoint = self.endpoint(&req.link_id);

            let response = self
                .client
                .get(&endpoint)
                .query(&req.query())
                .header(reqwest::header::USER_AGENT, &req.user_agent)
                .header("X-Forwarded-For", &req.source_ip)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    let error = describe_error(&e);
                    debug!(seq = req.seq, %error, "request failed");
                    return ProbeResult::transport_error(req.seq, error);
                }
            };

            let status = response.status().as_u16();
            match response.text().await {
                Ok(body) => {
                    let elapsed_ms = start.elapsed().as_millis() as u64;
                    ProbeResult::response(req.seq, status, &body, elapsed_ms)
                }
                Err(e) => {
                    let error = describe_error(&e);
                    debug!(seq = req.seq, status, %error, "failed to read response body");
                    ProbeResult::transport_error(req.seq, error)
                }
            }
        })
    }
}

/// What a [`MockProber`] answers for one request.
#[derive(Debug, Clone)]
pub enum MockReply {
    Response { status: u16, body: String },
    TransportError(String),
}

type Script = dyn Fn(&TrackRequest) -> (Duration, MockReply) + Send + Sync;

/// In-process prober for tests and dry runs. Each request is answered by a
/// script returning a delay and a reply.
pub struct MockProber {
    script: Arc<Script>,
}

impl MockProber {
    pub fn scripted<F>(script: F) -> Self
    where
        F: Fn(&TrackRequest) -> (Duration, MockReply) + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
        }
    }

    /// Mimics a tracking server whose per-IP limit starts firing at request
    /// `boundary`: redirects before it, the blocked-campaign page from it on.
    pub fn rate_limited(boundary: u32, delay_ms: u64) -> Self {
        Self::scripted(move |req| {
            let reply = if req.seq < boundary {
                MockReply::Response {
                    status: 302,
                    body: String::new(),
                }
            } else {
                MockReply::Response {
                    status: 200,
                    body: format!("<html><body>{FRAUD_MARKER}</body></html>"),
                }
            };
            (Duration::from_millis(delay_ms), reply)
        })
    }
}

impl TrackProber for MockProber {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn probe<'a>(
        &'a self,
        req: &'a TrackRequest,
    ) -> Pin<Box<dyn Future<Output = ProbeResult> + Send + 'a>> {
        Box::pin(async move {
            let start = Instant::now();
            let (delay, reply) = (self.script)(req);
            sleep(delay).await;

            match reply {
                MockReply::Response { status, body } => {
                    ProbeResult::response(req.seq, status, &body, start.elapsed().as_millis() as u64)
                }
                MockReply::TransportError(error) => ProbeResult::transport_error(req.seq, error),
            }
        })
    }
}

/// First `max` characters of `s`, never splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Flatten a reqwest error and its sources, e.g.
/// `error sending request: client error (Connect): tcp connect error: Connection refused`.
fn describe_error(err: &reqwest::Error) -> String {
    let mut out = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
