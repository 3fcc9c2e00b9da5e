use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info};

use crate::config::ProbeConfig;
use crate::prober::{ProbeResult, TrackProber};
use crate::request::{build_requests, run_user_prefix};
use crate::summary::Summary;

/// Everything one burst produced. `results` is sorted by sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRun {
    pub link_id: String,
    pub user_prefix: String,
    pub summary: Summary,
    pub results: Vec<ProbeResult>,
}

/// Fire `run.request_count` tracking requests for `link_id`, at most
/// `target.max_in_flight` at a time, and wait for every one of them.
pub async fn run_probe(
    config: &ProbeConfig,
    link_id: &str,
    prober: Arc<dyn TrackProber>,
) -> Result<ProbeRun> {
    config.check_limits()?;

    let user_prefix = run_user_prefix();
    let requests = build_requests(config, link_id, &user_prefix);
    let total = requests.len();
    let max_in_flight = config.target.max_in_flight;

    info!(
        "Starting {} requests via {} prober ({} in flight, user prefix {})",
        total,
        prober.name(),
        max_in_flight,
        user_prefix
    );

    let start_time = Instant::now();
    let semaphore = Arc::new(Semaphore::new(max_in_flight as usize));
    let (result_tx, mut result_rx) = mpsc::channel::<ProbeResult>(total);

    // Single writer for the result buffer; results arrive in completion order.
    let collector = tokio::spawn(async move {
        let mut results = Vec::with_capacity(total);
        while let Some(result) = result_rx.recv().await {
            if result.seq % 10 == 0 {
                println!("  Completed {}/{} requests...", result.seq, total);
            }
            results.push(result);
        }
        results
    });

    for req in requests {
        let permit = semaphore.clone().acquire_owned().await?;
        let prober = prober.clone();
        let result_tx = result_tx.clone();

        tokio::spawn(async move {
            let result = prober.probe(&req).await;
            if !result.success {
                debug!(seq = result.seq, error = ?result.error, "request recorded as error");
            }
            let _ = result_tx.send(result).await;
            drop(permit);
        });
    }

    debug!("Waiting for in-flight requests to complete...");
    let _ = semaphore.acquire_many(max_in_flight).await?;

    drop(result_tx);
    let mut results = collector.await?;
    let duration_ms = start_time.elapsed().as_millis() as u64;

    results.sort_by_key(|r| r.seq);
    check_complete(&results, total)?;

    let summary = Summary::from_results(&results, duration_ms);
    info!(
        "Finished {} requests in {}ms: redirects={} fraud={} errors={}",
        summary.total, duration_ms, summary.redirects, summary.fraud, summary.errors
    );

    Ok(ProbeRun {
        link_id: link_id.to_string(),
        user_prefix,
        summary,
        results,
    })
}

/// Sorted results must be exactly `1..=total`.
fn check_complete(results: &[ProbeResult], total: usize) -> Result<()> {
    if results.len() != total {
        anyhow::bail!(
            "Expected {} results, collected {} (a request task did not finish)",
            total,
            results.len()
        );
    }
    for (idx, result) in results.iter().enumerate() {
        let expected = idx as u32 + 1;
        if result.seq != expected {
            anyhow::bail!(
                "Result sequence mismatch at position {}: expected #{}, got #{}",
                idx,
                expected,
                result.seq
            );
        }
    }
    Ok(())
}
