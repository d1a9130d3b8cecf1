//! Browser tab reports and the live event feed

use anyhow::{bail, Result};
use clap::Subcommand;
use focusmate_core::{
    daemon::socket_path, Command, FocusEvent, IpcClient, Response, SkipReason, TabId,
};

use super::check::print_classification;
use super::helpers::{format_duration, truncate_str};
use super::session::send;

#[derive(Subcommand, Debug)]
pub enum TabAction {
    /// Check the page a tab currently shows
    Check {
        tab: TabId,
        url: String,
        #[arg(short, long)]
        title: String,
    },
    /// Report that a tab moved to another page
    Navigated {
        tab: TabId,
        url: String,
        #[arg(short, long)]
        title: String,
    },
    /// Report that a tab was closed
    Closed { tab: TabId },
}

/// Handle tab reports
pub async fn handle_tab_command(action: TabAction) -> Result<()> {
    let command = match action {
        TabAction::Check { tab, url, title } => Command::CheckRelevance {
            tab,
            url,
            title,
            content: None,
        },
        TabAction::Navigated { tab, url, title } => Command::PageNavigated {
            tab,
            url,
            title,
            content: None,
        },
        TabAction::Closed { tab } => Command::TabClosed { tab },
    };

    match send(command).await? {
        Response::Relevance { result, cached } => {
            if cached {
                println!("(cached)");
            }
            print_classification(&result);
        }
        Response::Skipped(SkipReason::NoSession) => {
            println!("No focus session, page not checked.");
        }
        Response::Skipped(SkipReason::InternalPage) => println!("Browser page, not checked."),
        Response::Ok => println!("Tab released."),
        other => bail!("Unexpected response from daemon: {other:?}"),
    }
    Ok(())
}

/// Print events from the daemon until it stops or Ctrl-C
///
/// # Errors
///
/// Returns an error if the daemon is unreachable
pub async fn watch_command(tab: Option<TabId>, json: bool) -> Result<()> {
    let client = IpcClient::new(&socket_path()?);
    let mut events = client.subscribe(tab).await?;
    if !json {
        println!("Watching focus events (Ctrl-C to stop)...");
    }

    loop {
        tokio::select! {
            event = events.next_event() => match event? {
                Some(event) if json => println!("{}", serde_json::to_string(&event)?),
                Some(event) => println!("{}", describe(&event)),
                None => {
                    log::info!("Daemon closed the event stream");
                    return Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn describe(event: &FocusEvent) -> String {
    let at = chrono::Local::now().format("%H:%M:%S");
    let text = match event {
        FocusEvent::Classified { tab, url, result } => format!(
            "tab {tab}: {} {}% ({}) {}",
            result.status,
            result.score,
            result.source,
            truncate_str(url, 60)
        ),
        FocusEvent::ShowBlock { tab, reason, score } => {
            format!("tab {tab}: blocked at {score}%: {reason}")
        }
        FocusEvent::ClearUi { tab } => format!("tab {tab}: clear"),
        FocusEvent::GraceStarted {
            tab,
            reason,
            seconds,
        } => format!("tab {tab}: grace period {seconds}s: {reason}"),
        FocusEvent::ForcedBlock { tab, reason } => format!("tab {tab}: forced block: {reason}"),
        FocusEvent::StateChanged(snapshot) => format!(
            "session: {} ({} left)",
            snapshot.phase.description(),
            format_duration(snapshot.remaining_ms)
        ),
        FocusEvent::StatisticsChanged(stats) => format!(
            "statistics: {} blocked, {} focused",
            stats.blocked_count,
            format_duration(i64::try_from(stats.total_focused_time_ms).unwrap_or(i64::MAX))
        ),
    };
    format!("[{at}] {text}")
}
