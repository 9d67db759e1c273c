use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use invtrack::clock::SystemClock;
use invtrack::config::TrackerConfig;
use invtrack::quotes::NoopQuoteSource;
use invtrack::service::TrackerService;

#[derive(Parser, Debug)]
#[command(name = "invtrack")]
#[command(about = "Broker CSV ingestion and portfolio reconciliation")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "invtrack.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one refresh cycle and print the resulting snapshots as JSON.
    Refresh {
        /// Refresh a single entry instead of all of them.
        #[arg(long)]
        entry: Option<String>,
    },
    /// Refresh continuously on each entry's schedule.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = TrackerConfig::load_or_default(&cli.config)?;
    if config.entries.is_empty() {
        warn!(config = %cli.config.display(), "no entries configured");
    }
    let service =
        TrackerService::from_config(&config, Arc::new(SystemClock), Arc::new(NoopQuoteSource))?;

    match cli.command {
        Command::Refresh { entry } => {
            let names = match entry {
                Some(name) => vec![name],
                None => service.entry_names(),
            };
            for name in names {
                match service.refresh(&name).await {
                    Ok(snapshot) => println!("{}", serde_json::to_string_pretty(&*snapshot)?),
                    Err(e) => warn!(entry = %name, error = %e, "refresh failed"),
                }
            }
            Ok(())
        }
        Command::Watch => loop {
            for (name, e) in service.refresh_all().await {
                warn!(entry = %name, error = %e, "refresh failed");
            }
            for name in service.entry_names() {
                if let Some(snapshot) = service.snapshot(&name) {
                    info!(
                        entry = %name,
                        version = snapshot.version,
                        total_value = %snapshot.totals.total_value,
                        "snapshot"
                    );
                }
            }
            let mut delay = std::time::Duration::from_secs(15 * 60);
            for name in service.entry_names() {
                if let Ok(next) = service.next_delay(&name).await {
                    delay = delay.min(next);
                }
            }
            tokio::time::sleep(delay).await;
        },
    }
}
