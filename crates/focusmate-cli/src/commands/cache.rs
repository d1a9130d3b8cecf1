//! Relevance cache management on the running daemon

use anyhow::{bail, Result};
use clap::Subcommand;
use focusmate_core::{Command, Response};
use tabled::{Table, Tabled};

use super::session::send;

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Drop every cached judgment
    Clear,
    /// Show cache usage
    Stats,
}

#[derive(Tabled)]
struct CacheRow {
    #[tabled(rename = "Entries")]
    total: usize,
    #[tabled(rename = "Valid")]
    valid: usize,
    #[tabled(rename = "Expired")]
    expired: usize,
    #[tabled(rename = "Size (KB)")]
    kilobytes: String,
}

/// Handle cache commands
pub async fn handle_cache_command(action: CacheAction) -> Result<()> {
    match action {
        CacheAction::Clear => match send(Command::ClearCache).await? {
            Response::CacheCleared => println!("Relevance cache cleared."),
            other => bail!("Unexpected response from daemon: {other:?}"),
        },
        CacheAction::Stats => match send(Command::CacheStats).await? {
            Response::CacheStats(stats) => {
                #[allow(clippy::cast_precision_loss)]
                let kilobytes = format!("{:.1}", stats.bytes as f64 / 1024.0);
                let row = CacheRow {
                    total: stats.total,
                    valid: stats.valid,
                    expired: stats.expired,
                    kilobytes,
                };
                println!("{}", Table::new(vec![row]));
            }
            other => bail!("Unexpected response from daemon: {other:?}"),
        },
    }
    Ok(())
}
