//! Telegram channel member exporter
//!
//! Logs in with a user account, resolves one channel or group from its link,
//! lists its members and writes them to a timestamped spreadsheet.

pub mod auth;
pub mod channel;
pub mod config;
pub mod error;
pub mod export;
pub mod fetch;
pub mod logging;
pub mod member;
pub mod session;

use std::path::PathBuf;

use tracing::{info, warn};

pub use channel::{ChannelKind, ChannelLink, Target};
pub use config::Config;
pub use error::{Error, Result};
pub use export::ExportFormat;
pub use member::{LastSeen, Member, MemberRole};
pub use session::{get_client, SessionLock};

use auth::Prompt;
use fetch::FetchOptions;

/// Outcome of a completed export
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub channel_title: String,
    pub exported: usize,
    pub bots: usize,
    pub verified: usize,
    pub premium: usize,
    pub reported_count: Option<usize>,
    pub output: PathBuf,
}

impl RunSummary {
    /// Summarize exported members, counting the flagged accounts among them.
    pub fn new(
        channel_title: String,
        members: &[Member],
        reported_count: Option<usize>,
        output: PathBuf,
    ) -> Self {
        Self {
            channel_title,
            exported: members.len(),
            bots: members.iter().filter(|m| m.is_bot).count(),
            verified: members.iter().filter(|m| m.is_verified).count(),
            premium: members.iter().filter(|m| m.is_premium).count(),
            reported_count,
            output,
        }
    }

    pub fn coverage(&self) -> Option<f64> {
        fetch::coverage(self.exported, self.reported_count)
    }
}

/// Run the whole export once: lock, connect, log in, resolve, fetch, write.
pub async fn run(config: &Config, prompt: &mut dyn Prompt) -> Result<RunSummary> {
    // A bad link must fail before any connection is made.
    let link = ChannelLink::parse(&config.channel_link)?;

    let _lock = SessionLock::acquire(config.lock_file())?;
    let client = get_client(config)?;

    auth::ensure_authorized(&client, config, prompt).await?;

    info!(link = %link, "Connecting to the channel");
    let peer = channel::resolve(&client, &link).await?;
    let target = Target::from_peer(&peer)?;
    info!(title = %target.title, kind = %target.kind, "Connected to channel");

    let reported = channel::reported_count(&client, &target).await;
    match reported {
        Some(count) => info!(count, "Total participants in channel: {}", count),
        None => warn!("Total participant count unknown"),
    }

    let members =
        fetch::fetch_members(&client, &target, reported, &FetchOptions::from_config(config))
            .await?;
    if members.is_empty() {
        return Err(Error::NoMembers(target.title));
    }

    let output = export::export_members(
        &members,
        &config.output_dir,
        &config.file_prefix,
        config.export_format,
    )?;

    let summary = RunSummary::new(target.title, &members, reported, output);

    info!(
        exported = summary.exported,
        bots = summary.bots,
        verified = summary.verified,
        premium = summary.premium,
        "Total unique participants exported: {} (bots: {}, verified: {}, premium: {})",
        summary.exported,
        summary.bots,
        summary.verified,
        summary.premium
    );
    if let Some(coverage) = summary.coverage() {
        info!("Coverage: {:.1}%", coverage);
    }

    Ok(summary)
}
