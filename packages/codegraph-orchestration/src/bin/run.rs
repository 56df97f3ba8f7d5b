//! Entry point for one incremental cross-indexing run (§6A). The only place in this crate that
//! calls `std::process::exit`: every other module returns a `Result` and lets its caller decide.
//!
//! Exit codes:
//!   0  success, changes committed
//!   2  nothing to do (no pending checkpoint rows)
//!  10  Splitter failure (transient exhausted or permanent)
//!  11  Store failure
//!  20  invariant violation
//!   1  any other error

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use codegraph_orchestration::{
    coordinator, Configuration, HttpProjectDescriptionSource, HttpSplitterClient, RunOutcome,
};
use codegraph_storage::SqliteConnectionGraphStore;

#[derive(Parser)]
#[command(name = "codegraph-run")]
#[command(about = "Runs one incremental cross-project connection-graph indexing pass")]
struct Cli {
    /// Path to the SQLite store file.
    #[arg(long, default_value = "codegraph.sqlite3")]
    store: String,

    /// Path to a JSON file overriding the default Configuration (§6); unset fields keep their
    /// default.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL of the Splitter service.
    #[arg(long)]
    splitter_url: String,

    /// Base URL of the project-description service.
    #[arg(long)]
    descriptions_url: String,

    /// Request timeout in seconds for both HTTP adapters.
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Configuration> {
    match path {
        None => Ok(Configuration::default()),
        Some(path) => {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load configuration");
            return ExitCode::from(1);
        }
    };

    let store = match SqliteConnectionGraphStore::open(&cli.store) {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(error = %err, "failed to open store");
            return ExitCode::from(11);
        }
    };

    let splitter = match HttpSplitterClient::new(&cli.splitter_url, cli.timeout_secs) {
        Ok(client) => client,
        Err(err) => {
            tracing::error!(error = %err, "failed to construct splitter client");
            return ExitCode::from(1);
        }
    };

    let descriptions = match HttpProjectDescriptionSource::new(&cli.descriptions_url, cli.timeout_secs) {
        Ok(source) => source,
        Err(err) => {
            tracing::error!(error = %err, "failed to construct project description client");
            return ExitCode::from(1);
        }
    };

    let cancellation = CancellationToken::new();
    let signal_token = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling after the current batch");
            signal_token.cancel();
        }
    });

    match coordinator::run_with_cancellation(&store, &splitter, &descriptions, &config, &cancellation).await {
        Ok(RunOutcome::Processed) => {
            tracing::info!("run completed");
            ExitCode::from(0)
        }
        Ok(RunOutcome::NothingToDo) => {
            tracing::info!("nothing to do");
            ExitCode::from(2)
        }
        Err(err) => {
            tracing::error!(error = %err, "run failed");
            if err.is_splitter_failure() {
                ExitCode::from(10)
            } else if err.is_invariant_violation() {
                ExitCode::from(20)
            } else if err.is_store_failure() {
                ExitCode::from(11)
            } else {
                ExitCode::from(1)
            }
        }
    }
}
