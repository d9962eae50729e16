use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser;
use furnace_acq::{AcquisitionService, Config};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Furnace acquisition daemon")]
struct Args {
    /// Configuration file (TOML)
    #[clap(long, short, default_value = "furnace_acq.toml")]
    config: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[clap(long, default_value = "info")]
    log_level: String,
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = Config::from_path(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.apply_env_overrides();

    let service = AcquisitionService::new(&config)?;
    service
        .store()
        .create_table()
        .await
        .context("preparing the reading table")?;

    let handle = service.spawn_acquisition();
    let stats = handle.stats();

    // the state channel closes when the loop task ends
    let mut state = handle.state();
    let ended = async move { while state.changed().await.is_ok() {} };
    tokio::select! {
        () = ended => {}
        res = tokio::signal::ctrl_c() => {
            res.context("installing ctrl-c handler")?;
            info!("ctrl-c received, stopping after the current cycle");
            handle.shutdown();
        }
    }
    handle.join().await?;
    info!(completed = stats.completed(), failed = stats.failed(), "daemon stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
