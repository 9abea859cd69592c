//! surge: concurrent HTTP load generator.
//!
//! Drives a fixed pool of workers against one or more endpoints for a fixed
//! duration and reports throughput, latency percentiles and status codes.

mod progress;
mod report;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use surge_core::{parse_header, LoadRunner, RunConfig};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use progress::ProgressDisplay;
use report::JsonReport;

#[derive(Parser, Debug)]
#[command(name = "surge")]
#[command(about = "Concurrent HTTP load generator", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "SURGE_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a load test
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Target URL (repeat for round-robin over several endpoints)
    #[arg(short = 'u', long = "url")]
    urls: Vec<String>,

    /// Number of concurrent workers [default: 10]
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Test duration, e.g. 30s or 2m [default: 10s]
    #[arg(short, long, value_parser = humantime::parse_duration)]
    duration: Option<Duration>,

    /// HTTP method [default: GET]
    #[arg(short, long)]
    method: Option<String>,

    /// Request body
    #[arg(short, long)]
    body: Option<String>,

    /// Request header as 'Key: Value' (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Maximum requests per second across all workers (0 = unlimited)
    #[arg(short = 'r', long)]
    max_rps: Option<u32>,

    /// Per-request timeout [default: 30s]
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Also write the results as JSON
    #[arg(short, long)]
    json: bool,

    /// JSON output path (default: results/surge-result-YYYYMMDD-HHMMSS.json)
    #[arg(short, long, requires = "json")]
    output: Option<PathBuf>,

    /// YAML run file; flags override its values
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,

    /// Disable the live progress bar
    #[arg(long)]
    no_progress: bool,

    /// Serve Prometheus metrics on this address during the run
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,
}

impl RunArgs {
    /// Merge the run file (if any) with command-line overrides.
    fn to_config(&self) -> Result<RunConfig> {
        let mut config = match &self.file {
            Some(path) => RunConfig::from_file(path)
                .with_context(|| format!("failed to load run file {}", path.display()))?,
            None => RunConfig::new(Vec::new()),
        };

        if !self.urls.is_empty() {
            config.urls = self.urls.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(duration) = self.duration {
            config.duration = duration;
        }
        if let Some(method) = &self.method {
            config.method = method.clone();
        }
        if let Some(body) = &self.body {
            config.body = Some(body.clone());
        }
        for raw in &self.headers {
            let (name, value) = parse_header(raw)?;
            config.headers.insert(name, value);
        }
        if let Some(max_rps) = self.max_rps {
            config.max_rps = max_rps;
        }
        if let Some(timeout) = self.timeout {
            config.request_timeout = timeout;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    }
}

fn init_tracing(level: &str, json: bool) -> Result<()> {
    let builder = FmtSubscriber::builder()
        .with_max_level(parse_level(level))
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json)?;

    match cli.command {
        Commands::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = args.to_config()?;

    if let Some(addr) = args.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to start Prometheus exporter")?;
        info!(%addr, "Prometheus metrics exporter listening");
    }

    let runner = LoadRunner::new(config)?;
    let config = runner.config().clone();
    eprintln!("{}", report::format_banner(&config));

    let cancel = runner.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping load test");
            cancel.cancel();
        }
    });

    let display = (!args.no_progress)
        .then(|| ProgressDisplay::spawn(runner.stats(), config.duration));

    let summary = runner.run().await;
    let bar = match display {
        Some(display) => Some(display.finish().await),
        None => None,
    };
    let summary = summary?;

    let table = report::format_table(&summary);
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    println!("{}", table);

    if args.json {
        let path = JsonReport::new(&config, &summary).write(args.output.as_deref())?;
        eprintln!("Results saved to {}", path.display());
    }

    Ok(())
}
