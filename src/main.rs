use anyhow::Result;
use clap::Parser;
use hbcd2reproschema::{
    config::Settings,
    pipeline::{self, RunOptions},
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Convert an HBCD data dictionary release to ReproSchema"
)]
struct Args {
    /// Release version, e.g. 1.0; the newest release in the archive when omitted
    #[arg(long)]
    release: Option<String>,
    /// Use an existing data/<dataset>_<release>.csv instead of extracting
    #[arg(long)]
    skip_extract: bool,
    /// Keep the extracted CSV and any downloaded archive
    #[arg(long)]
    keep_data: bool,
    /// Download the archive even when a local copy exists
    #[arg(long)]
    download: bool,
    /// Create git tag v<release> after a complete run
    #[arg(long)]
    create_tag: bool,
    /// Settings file (default: hbcd2reproschema.yaml if present)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write the extraction report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    // ─── 2) settings & options ───────────────────────────────────────
    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref())?;
    let opts = RunOptions {
        release: args.release,
        skip_extract: args.skip_extract,
        keep_data: args.keep_data,
        download: args.download,
        create_tag: args.create_tag,
        report: args.report,
        github_output: RunOptions::github_output_from_env(),
    };

    // ─── 3) run ──────────────────────────────────────────────────────
    let summary = pipeline::run(&settings, &opts)?;
    info!(
        version = summary.version.as_deref().unwrap_or(""),
        status = summary.status.as_str(),
        validated = summary.validated,
        output = %summary.output_dir.display(),
        "conversion complete"
    );
    Ok(())
}
