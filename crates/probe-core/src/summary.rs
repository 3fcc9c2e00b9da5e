use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::prober::ProbeResult;

/// Body text the tracking server returns when it refuses to redirect.
/// Matched case-insensitively as a plain substring.
pub const FRAUD_MARKER: &str = "campaign not available";

pub const STATUS_REDIRECT: u16 = 302;
pub const STATUS_OK: u16 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// 200 carrying the blocked-campaign page
    Fraud,
    /// 302 to the campaign target
    Redirect,
    /// Any other status, only counted in the histogram
    Other(u16),
    /// No response at all
    Error,
}

pub fn classify(result: &ProbeResult) -> Classification {
    let status = match (result.success, result.status_code) {
        (true, Some(status)) => status,
        _ => return Classification::Error,
    };

    if status == STATUS_OK && result.body.to_lowercase().contains(FRAUD_MARKER) {
        Classification::Fraud
    } else if status == STATUS_REDIRECT {
        Classification::Redirect
    } else {
        Classification::Other(status)
    }
}

/// Running tally over probe results.
pub struct SummaryCollector {
    pub total: u64,
    pub fraud: u64,
    pub redirects: u64,
    pub errors: u64,
    status_counts: BTreeMap<u16, u64>,
}

impl SummaryCollector {
    pub fn new() -> Self {
        Self {
            total: 0,
            fraud: 0,
            redirects: 0,
            errors: 0,
            status_counts: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, result: &ProbeResult) {
        self.total += 1;

        let class = classify(result);
        let status = match (class, result.status_code) {
            (Classification::Error, _) | (_, None) => {
                self.errors += 1;
                return;
            }
            (_, Some(status)) => status,
        };
        *self.status_counts.entry(status).or_insert(0) += 1;

        match class {
            Classification::Fraud => self.fraud += 1,
            Classification::Redirect => self.redirects += 1,
            Classification::Other(_) | Classification::Error => {}
        }
    }

    pub fn summary(&self, duration_ms: u64) -> Summary {
        let requests_per_second = if duration_ms > 0 {
            self.total as f64 * 1000.0 / duration_ms as f64
        } else {
            0.0
        };

        Summary {
            total: self.total,
            fraud: self.fraud,
            redirects: self.redirects,
            errors: self.errors,
            status_counts: self.status_counts.clone(),
            duration_ms,
            requests_per_second,
        }
    }
}

impl Default for SummaryCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: u64,
    pub fraud: u64,
    pub redirects: u64,
    pub errors: u64,
    /// Status code histogram, transport errors excluded
    pub status_counts: BTreeMap<u16, u64>,
    pub duration_ms: u64,
    pub requests_per_second: f64,
}

impl Summary {
    pub fn from_results(results: &[ProbeResult], duration_ms: u64) -> Self {
        let mut collector = SummaryCollector::new();
        for result in results {
            collector.record(result);
        }
        collector.summary(duration_ms)
    }

    pub fn histogram_total(&self) -> u64 {
        self.status_counts.values().sum()
    }
}
