//! tg_members: export the member list of one Telegram channel
//!
//! Reads `members.env` (or `$TG_CONFIG`), runs the export once and exits.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use tg_members::auth::StdinPrompt;
use tg_members::config::{Config, LOG_FILE};
use tg_members::logging;

#[derive(Parser)]
#[command(name = "tg_members")]
#[command(about = "Export the member list of a Telegram channel or group to a spreadsheet")]
#[command(version)]
#[command(
    after_help = "Settings are read from members.env (override the path with TG_CONFIG).\nRequired keys: TG_API_ID, TG_API_HASH, TG_PHONE_NUMBER, TG_GROUP_LINK"
)]
struct Cli {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _cli = Cli::parse();

    // Config errors are still logged, to the default log file.
    let config = Config::load();
    let log_file = config
        .as_ref()
        .map(|c| c.log_file.clone())
        .unwrap_or_else(|_| PathBuf::from(LOG_FILE));

    let _guard = match logging::init(&log_file) {
        Ok(guard) => guard,
        Err(e) => {
            if let Err(config_err) = &config {
                eprintln!("{}", config_err);
            }
            return Err(anyhow::Error::new(e)
                .context(format!("failed to open log file {}", log_file.display())));
        }
    };

    let config = config.inspect_err(|e| {
        error!("{}", e);
        error!("Fix the configuration and run again, no connection was attempted");
    })?;

    info!("Starting Telegram channel members parser...");

    let summary = tg_members::run(&config, &mut StdinPrompt)
        .await
        .inspect_err(|e| {
            error!("{}", e);
            error!("Parsing failed!");
        })?;

    info!(
        output = %summary.output.display(),
        "Success! {} members from '{}' exported",
        summary.exported,
        summary.channel_title
    );
    Ok(())
}
