use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use probe_core::report::{render_banner, render_results, JsonReport};
use probe_core::{run_probe, HttpProber, MockProber, ProbeConfig, ProbeRun, TrackProber};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "fraud-probe")]
#[command(about = "Fire a burst of tracking requests from one IP and check the fraud rules kick in")]
struct Args {
    /// Link ID of the campaign under test
    link_id: Option<String>,

    /// Base URL of the tracking server [default: http://localhost:4001]
    server_url: Option<String>,

    /// Optional TOML file with target/identity/run settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of requests in the burst (overrides config)
    #[arg(long)]
    requests: Option<u32>,

    /// Maximum concurrent in-flight requests (overrides config)
    #[arg(long)]
    concurrency: Option<u32>,

    /// Per-request timeout in milliseconds (overrides config)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// User-Agent sent with every request (overrides config)
    #[arg(long)]
    user_agent: Option<String>,

    /// X-Forwarded-For value sent with every request (overrides config)
    #[arg(long)]
    source_ip: Option<String>,

    /// Request index where the IP rate limit should start firing
    #[arg(long)]
    rate_limit_boundary: Option<u32>,

    /// Probe mode: http or mock
    #[arg(long, default_value = "http")]
    mode: String,

    /// Write the summary and every result as JSON to this path
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    let Some(link_id) = args.link_id.clone() else {
        print_usage();
        std::process::exit(1);
    };

    let config = build_config(&args)?;

    let prober: Arc<dyn TrackProber> = match args.mode.as_str() {
        "http" => Arc::new(
            HttpProber::new(&config.target).context("Failed to create HTTP prober")?,
        ),
        "mock" => Arc::new(MockProber::rate_limited(config.run.rate_limit_boundary, 5)),
        _ => anyhow::bail!("Invalid mode: {}, must be 'http' or 'mock'", args.mode),
    };

    println!();
    println!("Testing fraud detection...");
    println!("Make sure your server is running at {}", config.target.server_url);
    println!("Make sure you have an active campaign with link_id: {link_id}");
    println!();
    render_banner(&mut std::io::stdout().lock(), &config, &link_id)?;

    let run = tokio::select! {
        run = run_probe(&config, &link_id, prober) => run?,
        _ = interrupted() => {
            println!("\n\nTest interrupted by user");
            std::process::exit(1);
        }
    };

    render_results(&mut std::io::stdout().lock(), &config, &run)?;

    if let Some(path) = &args.output {
        write_json_report(path, &config, &run)?;
    }

    Ok(())
}

/// Defaults, then the config file, then explicit flags.
fn build_config(args: &Args) -> Result<ProbeConfig> {
    let mut config = match &args.config {
        Some(path) => ProbeConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => ProbeConfig::default(),
    };

    if let Some(server_url) = &args.server_url {
        config.target.server_url = server_url.clone();
    }
    if let Some(requests) = args.requests {
        config.run.request_count = requests;
    }
    if let Some(concurrency) = args.concurrency {
        config.target.max_in_flight = concurrency;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.target.timeout_ms = timeout_ms;
    }
    if let Some(user_agent) = &args.user_agent {
        config.identity.user_agent = user_agent.clone();
    }
    if let Some(source_ip) = &args.source_ip {
        config.identity.source_ip = source_ip.clone();
    }
    if let Some(boundary) = args.rate_limit_boundary {
        config.run.rate_limit_boundary = boundary;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Resolves on Ctrl+C. If the handler cannot be installed the run simply
/// cannot be interrupted.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn write_json_report(path: &PathBuf, config: &ProbeConfig, run: &ProbeRun) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
    }

    let json = serde_json::to_string_pretty(&JsonReport::new(config, run))?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
    info!("Results written to {:?}", path);
    Ok(())
}

fn print_usage() {
    println!("Usage: fraud-probe <link_id> [server_url] [OPTIONS]");
    println!();
    println!("Example:");
    println!("  fraud-probe 123e4567-e89b-12d3-a456-426614174000");
    println!("  fraud-probe 123e4567-e89b-12d3-a456-426614174000 http://localhost:4001");
    println!();
    println!("Run with --help for all options.");
}
