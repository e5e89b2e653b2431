//! Run one scrape against the local Discord client and print the snapshot.
//!
//!   cargo run --bin discord-scrape -- --pretty
//!   cargo run --bin discord-scrape -- --port 9222 --max-attempts 5

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use discord_scrape::config::{self, ScrapeConfig};
use discord_scrape::utils::init_logging;
use discord_scrape::ScrapeSession;

#[derive(Parser, Debug)]
#[command(name = "discord-scrape")]
#[command(about = "Snapshot installed apps, friends and account email from a running Discord client")]
struct Args {
    /// DevTools port to enable on the client.
    #[arg(long, env = config::ENV_PORT)]
    port: Option<u16>,

    /// Connection attempts before giving up.
    #[arg(long, env = config::ENV_MAX_ATTEMPTS)]
    max_attempts: Option<u32>,

    /// JSON file overriding the UI locators.
    #[arg(long, env = config::ENV_LOCATORS)]
    locators: Option<PathBuf>,

    /// Pretty-print the snapshot.
    #[arg(long)]
    pretty: bool,
}

impl Args {
    fn into_config(self) -> Result<(ScrapeConfig, bool)> {
        let mut config = ScrapeConfig::from_env();
        if let Some(port) = self.port {
            config.debug_port = port;
        }
        if let Some(attempts) = self.max_attempts {
            config.retry.max_attempts = attempts;
        }
        if let Some(path) = &self.locators {
            config.locators = config::load_locators(path).context("loading --locators")?;
        }
        Ok((config, self.pretty))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let (config, pretty) = Args::parse().into_config()?;
    info!(port = config.debug_port, "Starting scrape");

    let session = ScrapeSession::new(config);
    let snapshot = match session.start()?.wait().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            if e.requires_reauthentication() {
                error!("Discord is not reachable; the user needs to sign in again");
            }
            return Err(e.into());
        }
    };

    let json = if pretty {
        serde_json::to_string_pretty(&snapshot)?
    } else {
        serde_json::to_string(&snapshot)?
    };
    println!("{json}");
    Ok(())
}
