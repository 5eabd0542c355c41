use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use ytr_sync::RunOutcome;

#[derive(Debug, Parser)]
#[command(name = "ytr-cli")]
#[command(about = "Incremental YouTube Reporting extractor")]
struct Cli {
    /// Data directory holding config.json, in/ and out/.
    #[arg(long = "data", env = "YTR_DATA_DIR")]
    data: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("YTR_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match ytr_sync::run_sync_once(cli.data).await {
        Ok(summary) => {
            match summary.outcome {
                RunOutcome::NoMatchingJobs => {
                    println!("no reporting jobs exist for the configured report types; nothing to download")
                }
                RunOutcome::NoNewData => println!("no new reports since the last run"),
                RunOutcome::Completed => println!(
                    "sync complete: run_id={} reports={} rows={} tables={} backed_up={}",
                    summary.run_id,
                    summary.downloaded_reports,
                    summary.rows_written(),
                    summary.tables.len(),
                    summary.backed_up_objects
                ),
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "sync failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
