use std::io::{self, Write};

use serde::Serialize;

use crate::config::ProbeConfig;
use crate::harness::ProbeRun;
use crate::prober::{truncate_chars, ProbeResult};
use crate::summary::{Summary, FRAUD_MARKER};

const RULE_WIDTH: usize = 80;
const SAMPLE_BODY_CHARS: usize = 100;
const EDGE_SAMPLES: usize = 3;

/// A titled slice of results shown in the report.
#[derive(Debug)]
pub struct SampleWindow<'a> {
    pub title: String,
    pub results: &'a [ProbeResult],
}

/// First three, the requests around `boundary` (two before, three from it)
/// when the run reached it, and the last three.
pub fn sample_windows(results: &[ProbeResult], boundary: u32) -> Vec<SampleWindow<'_>> {
    let mut windows = vec![SampleWindow {
        title: format!("First {EDGE_SAMPLES} responses:"),
        results: &results[..results.len().min(EDGE_SAMPLES)],
    }];

    let boundary = boundary as usize;
    if boundary > 0 && results.len() >= boundary {
        let start = boundary.saturating_sub(2);
        let end = (boundary + 3).min(results.len());
        windows.push(SampleWindow {
            title: format!(
                "Responses around request {boundary} (when IP rate limit should trigger):"
            ),
            results: &results[start..end],
        });
    }

    windows.push(SampleWindow {
        title: format!("Last {EDGE_SAMPLES} responses:"),
        results: &results[results.len().saturating_sub(EDGE_SAMPLES)..],
    });

    windows
}

pub fn render_banner<W: Write>(out: &mut W, config: &ProbeConfig, link_id: &str) -> io::Result<()> {
    let rule = "=".repeat(RULE_WIDTH);
    writeln!(out, "{rule}")?;
    writeln!(out, "FRAUD DETECTION TEST")?;
    writeln!(out, "{rule}")?;
    writeln!(out, "Server URL: {}", config.target.server_url)?;
    writeln!(out, "Link ID: {link_id}")?;
    writeln!(out, "Number of requests: {}", config.run.request_count)?;
    writeln!(out, "Concurrency: {}", config.target.max_in_flight)?;
    writeln!(out, "User-Agent: {}", config.identity.user_agent)?;
    writeln!(
        out,
        "IP Address: {} (same IP for all requests)",
        config.identity.source_ip
    )?;
    writeln!(out, "{rule}")?;
    writeln!(out)?;
    writeln!(out, "Starting {} requests...", config.run.request_count)?;
    writeln!(out, "This will trigger:")?;
    writeln!(out, "  1. UA_BLOCKLIST: User-Agent matches blocked pattern")?;
    writeln!(
        out,
        "  2. IP_RATE_LIMIT: {}+ requests from same IP in 60 seconds",
        config.run.rate_limit_boundary
    )?;
    writeln!(out)?;
    Ok(())
}

pub fn render_results<W: Write>(out: &mut W, config: &ProbeConfig, run: &ProbeRun) -> io::Result<()> {
    let rule = "=".repeat(RULE_WIDTH);
    let summary = &run.summary;

    writeln!(out)?;
    writeln!(out, "{rule}")?;
    writeln!(out, "RESULTS SUMMARY")?;
    writeln!(out, "{rule}")?;
    writeln!(out, "Total requests: {}", summary.total)?;
    writeln!(
        out,
        "Total time: {:.2} seconds",
        summary.duration_ms as f64 / 1000.0
    )?;
    writeln!(out, "Requests per second: {:.2}", summary.requests_per_second)?;
    writeln!(out)?;

    render_distribution(out, summary)?;

    writeln!(out, "Sample Responses:")?;
    writeln!(out, "{}", "-".repeat(RULE_WIDTH))?;
    for window in sample_windows(&run.results, config.run.rate_limit_boundary) {
        writeln!(out)?;
        writeln!(out, "{}", window.title)?;
        for result in window.results {
            render_sample(out, result)?;
        }
    }

    render_verdict(out, config, summary)
}

fn render_distribution<W: Write>(out: &mut W, summary: &Summary) -> io::Result<()> {
    writeln!(out, "Status Code Distribution:")?;
    for (status, count) in &summary.status_counts {
        writeln!(out, "  {status}: {count}")?;
    }
    writeln!(out)?;

    writeln!(out, "Response Analysis:")?;
    writeln!(
        out,
        "  Fraud responses (200 + '{FRAUD_MARKER}'): {}",
        summary.fraud
    )?;
    writeln!(out, "  Redirect responses (302): {}", summary.redirects)?;
    writeln!(out, "  Error responses: {}", summary.errors)?;
    writeln!(out)?;
    Ok(())
}

fn render_sample<W: Write>(out: &mut W, result: &ProbeResult) -> io::Result<()> {
    let status = match result.status_code {
        Some(status) => status.to_string(),
        None => "None".to_string(),
    };
    writeln!(out, "  Request #{}:", result.seq)?;
    writeln!(out, "    Status: {status}")?;
    writeln!(
        out,
        "    Body: {}...",
        truncate_chars(&result.body, SAMPLE_BODY_CHARS)
    )?;
    writeln!(out)?;
    Ok(())
}

fn render_verdict<W: Write>(out: &mut W, config: &ProbeConfig, summary: &Summary) -> io::Result<()> {
    let rule = "=".repeat(RULE_WIDTH);
    let boundary = config.run.rate_limit_boundary;

    writeln!(out, "{rule}")?;
    writeln!(out, "EXPECTED BEHAVIOR:")?;
    writeln!(out, "{rule}")?;
    writeln!(
        out,
        "1. First ~{} requests: Should return 302 (redirect) - only UA_BLOCKLIST triggered",
        boundary.saturating_sub(1)
    )?;
    writeln!(
        out,
        "2. Request {boundary}+: Should return 200 with '{FRAUD_MARKER}' - both"
    )?;
    writeln!(
        out,
        "   UA_BLOCKLIST and IP_RATE_LIMIT triggered (2+ rules = FRAUD)"
    )?;
    writeln!(out)?;

    if summary.fraud > 0 {
        writeln!(out, "✓ SUCCESS: Fraud detection is working!")?;
        writeln!(out, "  {} requests were marked as fraud", summary.fraud)?;
    } else {
        writeln!(out, "✗ WARNING: No fraud responses detected")?;
        writeln!(out, "  Check that:")?;
        writeln!(out, "    - User-Agent matches blocked pattern")?;
        writeln!(
            out,
            "    - {boundary}+ requests were made within 60 seconds"
        )?;
        writeln!(out, "    - All requests used the same IP address")?;
    }
    writeln!(out, "{rule}")?;
    Ok(())
}

/// Machine-readable copy of a run, written when `--output` is given.
#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub timestamp: String,
    pub server_url: &'a str,
    pub link_id: &'a str,
    pub user_agent: &'a str,
    pub source_ip: &'a str,
    pub user_prefix: &'a str,
    pub summary: &'a Summary,
    pub results: &'a [ProbeResult],
}

impl<'a> JsonReport<'a> {
    pub fn new(config: &'a ProbeConfig, run: &'a ProbeRun) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            server_url: &config.target.server_url,
            link_id: &run.link_id,
            user_agent: &config.identity.user_agent,
            source_ip: &config.identity.source_ip,
            user_prefix: &run.user_prefix,
            summary: &run.summary,
            results: &run.results,
        }
    }
}
