use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:4001";
pub const DEFAULT_SOURCE_IP: &str = "192.168.1.100";

/// User agents the tracking server is expected to have on its blocklist.
pub const BLOCKED_USER_AGENTS: [&str; 3] = [
    "curl/7.68.0",
    "wget/1.20.3",
    "python-requests/2.28.0",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub run: RunConfig,
}

impl ProbeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ProbeConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Check the values a run cannot start without and normalise the target URL.
    pub fn validate(&mut self) -> anyhow::Result<()> {
        self.target.server_url = normalize_server_url(&self.target.server_url)?;
        self.check_limits()
    }

    /// Counts and durations a run needs to be non-zero.
    pub fn check_limits(&self) -> anyhow::Result<()> {
        if self.run.request_count == 0 {
            anyhow::bail!("request_count must be a positive integer");
        }
        if self.target.max_in_flight == 0 {
            anyhow::bail!("max_in_flight must be a positive integer");
        }
        if self.target.timeout_ms == 0 {
            anyhow::bail!("timeout_ms must be non-zero");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Base URL of the tracking server, without trailing slash
    pub server_url: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// Maximum concurrent in-flight requests
    pub max_in_flight: u32,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            timeout_ms: 10_000,
            max_in_flight: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Sent as `User-Agent` on every request
    pub user_agent: String,
    /// Sent as `X-Forwarded-For` on every request
    pub source_ip: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_agent: BLOCKED_USER_AGENTS[0].to_string(),
            source_ip: DEFAULT_SOURCE_IP.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Total requests in the burst
    pub request_count: u32,
    /// Request index where the server's per-IP limit should start firing
    pub rate_limit_boundary: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            request_count: 105,
            rate_limit_boundary: 100,
        }
    }
}

/// Strip trailing slashes and make sure what is left is an http(s) URL.
pub fn normalize_server_url(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = url::Url::parse(trimmed).with_context(|| format!("Invalid server URL: {raw}"))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("Server URL must be http:// or https:// (got {raw})");
    }
    if url.host_str().is_none() {
        anyhow::bail!("Server URL must include a host (got {raw})");
    }

    Ok(trimmed.to_string())
}
