use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tracing::{warn, Instrument};

use station_handoff::cli::{commands, Cli};
use station_handoff::config::HandoffConfig;
use station_handoff::telemetry::{create_handoff_span, generate_correlation_id, init_telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_file = HandoffConfig::load_env_file();
    let config = HandoffConfig::load_from(cli.config.as_deref())?;
    init_telemetry(&config.observability)?;
    if let Err(e) = env_file {
        warn!(error = %e, "Ignoring malformed .env file");
    }

    let correlation_id = generate_correlation_id();
    let span = create_handoff_span("cli", None, None, Some(&correlation_id));
    let run = commands::dispatch(cli.command, &config).instrument(span);

    match cli.timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), run)
            .await
            .with_context(|| format!("command did not finish within {secs}s"))?,
        None => run.await,
    }
}
