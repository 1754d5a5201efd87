//! arXiv digest: binary entrypoint.
//! Loads config, runs the pipeline once and exits; scheduling is left to cron/systemd.
//!
//! Exit codes: 0 success (zero relevant papers included), 1 configuration error,
//! 2 scoring finished but a delivery channel failed.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use arxiv_digest::config::AppConfig;
use arxiv_digest::digest::render;
use arxiv_digest::metrics::Metrics;
use arxiv_digest::pipeline::{Pipeline, RunOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "arxiv-digest", version, about = "Score today's arXiv preprints against your interests and send a digest")]
struct Cli {
    /// Config file (TOML). Defaults to config/digest.toml.
    #[arg(long, env = "DIGEST_CONFIG")]
    config: Option<PathBuf>,

    /// Print the digest instead of delivering it.
    #[arg(long)]
    dry_run: bool,

    /// Output format for --dry-run.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[arg(long, value_enum, default_value_t = LogFormat::Compact, env = "DIGEST_LOG_FORMAT")]
    log_format: LogFormat,

    /// Write Prometheus metrics to this file when the run ends.
    #[arg(long)]
    metrics_out: Option<PathBuf>,
}

const EXIT_CONFIG: u8 = 1;
const EXIT_DELIVERY: u8 = 2;

/// Logs go to stderr so stdout carries only the digest.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("arxiv_digest=info,warn"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let metrics = match cli.metrics_out.as_ref().map(|_| Metrics::init()) {
        Some(Ok(m)) => Some(m),
        Some(Err(e)) => {
            warn!(error = %format!("{e:#}"), "metrics disabled");
            None
        }
        None => None,
    };

    let path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let cfg = match AppConfig::load_from_file(&path) {
        Ok(c) => c,
        Err(e) => {
            error!(path = %path.display(), error = %e, "configuration rejected");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let pipeline = match Pipeline::from_config(&cfg) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "configuration rejected");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let report = pipeline
        .run(RunOptions {
            dry_run: cli.dry_run,
            now: None,
        })
        .await;

    if let Some(e) = report.fetch_error() {
        warn!(error = %e, "digest is empty because fetching failed");
    }

    if cli.dry_run {
        match cli.format {
            OutputFormat::Text => {
                println!("{}\n", render::subject(&report.digest));
                println!("{}", render::render_text(&report.digest));
            }
            OutputFormat::Json => match render::render_json(&report.digest) {
                Ok(json) => println!("{json}"),
                Err(e) => error!(error = %e, "digest could not be serialized"),
            },
        }
    }

    if let (Some(m), Some(out)) = (metrics.as_ref(), cli.metrics_out.as_ref()) {
        if let Err(e) = m.write_textfile(out) {
            warn!(error = %format!("{e:#}"), "metrics textfile not written");
        }
    }

    if report.delivery_failed() {
        for f in report.delivery.failures() {
            error!(error = %f, "delivery failed");
        }
        return ExitCode::from(EXIT_DELIVERY);
    }
    info!(relevant = report.digest.len(), "done");
    ExitCode::SUCCESS
}
