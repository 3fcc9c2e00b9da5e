use serde::{Deserialize, Serialize};

use crate::config::ProbeConfig;

/// One tracking request in the burst. Built up front, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRequest {
    pub seq: u32,
    pub link_id: String,
    pub user_id: String,
    pub gaid: String,
    pub idfa: String,
    pub user_agent: String,
    pub source_ip: String,
}

impl TrackRequest {
    /// Query parameters in the order the tracking endpoint documents them.
    pub fn query(&self) -> [(&'static str, &str); 3] {
        [
            ("user_id", self.user_id.as_str()),
            ("gaid", self.gaid.as_str()),
            ("idfa", self.idfa.as_str()),
        ]
    }
}

/// Prefix shared by every synthetic user id in one run.
pub fn run_user_prefix() -> String {
    format!("test-user-{}", chrono::Utc::now().timestamp())
}

/// Build requests `1..=request_count`. Device ids depend only on the sequence
/// number so two runs differ only in the user id prefix.
pub fn build_requests(config: &ProbeConfig, link_id: &str, user_prefix: &str) -> Vec<TrackRequest> {
    (1..=config.run.request_count)
        .map(|seq| TrackRequest {
            seq,
            link_id: link_id.to_string(),
            user_id: format!("{user_prefix}-{seq}"),
            gaid: format!("test-gaid-{seq}"),
            idfa: format!("test-idfa-{seq}"),
            user_agent: config.identity.user_agent.clone(),
            source_ip: config.identity.source_ip.clone(),
        })
        .collect()
}
