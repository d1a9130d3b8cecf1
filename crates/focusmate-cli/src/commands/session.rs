//! Focus session commands, forwarded to the running daemon

use anyhow::{bail, Result};
use clap::Subcommand;
use focusmate_core::{daemon::socket_path, Command, IpcClient, Response, SessionSnapshot};
use focusmate_storage::{BreakKind, Phase, Statistics};
use tabled::{Table, Tabled};

use super::helpers::{format_duration, format_time, truncate_str};

#[derive(Subcommand, Debug)]
pub enum SessionAction {
    /// Start a focus session on the given keywords
    Start {
        /// What you are working on (e.g. "rust async runtime")
        keywords: Vec<String>,
    },
    /// Pause the running focus phase
    Pause,
    /// Resume a paused focus phase
    Resume,
    /// Stop the session (statistics are kept)
    Stop,
    /// Finish the focus phase now and start the break
    EndFocus,
    /// Finish the break now and start the next focus phase
    EndBreak,
    /// Skip the running break
    SkipBreak,
    /// Mark the session's task as done
    Done,
    /// Change the focus keywords (clears cached judgments)
    Keywords {
        keywords: Vec<String>,
    },
    /// Show the current session
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show focus statistics
    Stats,
}

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

impl Row {
    fn new(field: &'static str, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }
}

pub(crate) async fn send(command: Command) -> Result<Response> {
    let client = IpcClient::new(&socket_path()?);
    client.command(command).await
}

fn joined(words: &[String]) -> Result<String> {
    let text = words.join(" ");
    if text.trim().is_empty() {
        bail!("Keywords must not be empty");
    }
    Ok(text)
}

/// Handle session commands
pub async fn handle_session_command(action: SessionAction) -> Result<()> {
    let command = match action {
        SessionAction::Start { keywords } => Command::InitFocus {
            keywords: joined(&keywords)?,
        },
        SessionAction::Pause => Command::PauseFocus,
        SessionAction::Resume => Command::ResumeFocus,
        SessionAction::Stop => Command::StopFocus,
        SessionAction::EndFocus => Command::EndFocus,
        SessionAction::EndBreak => Command::EndBreak,
        SessionAction::SkipBreak => Command::SkipBreak,
        SessionAction::Done => Command::MarkTaskComplete,
        SessionAction::Keywords { keywords } => Command::SetKeywords {
            keywords: joined(&keywords)?,
        },
        SessionAction::Status { json } => {
            return match send(Command::GetState).await? {
                Response::State(snapshot) if json => {
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                    Ok(())
                }
                Response::State(snapshot) => {
                    print_snapshot(&snapshot);
                    Ok(())
                }
                other => bail!("Unexpected response from daemon: {other:?}"),
            };
        }
        SessionAction::Stats => Command::GetStatistics,
    };

    match send(command).await? {
        Response::State(snapshot) => print_snapshot(&snapshot),
        Response::Statistics(stats) => print_statistics(&stats),
        other => bail!("Unexpected response from daemon: {other:?}"),
    }
    Ok(())
}

fn phase_label(snapshot: &SessionSnapshot) -> String {
    match (snapshot.phase, snapshot.break_kind) {
        (Phase::Break, Some(BreakKind::Long)) => "Long break".to_string(),
        (Phase::Break, Some(BreakKind::Short)) => "Short break".to_string(),
        (phase, _) => phase.description().to_string(),
    }
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    if !snapshot.is_active() {
        println!("No focus session. Start one with: focusmate start <keywords>");
        return;
    }

    let rows = vec![
        Row::new("Phase", phase_label(snapshot)),
        Row::new(
            "Keywords",
            truncate_str(snapshot.keywords.as_deref().unwrap_or_default(), 48),
        ),
        Row::new("Remaining", format_duration(snapshot.remaining_ms)),
        Row::new("Ends at", format_time(snapshot.target_end_time)),
        Row::new("Completed cycles", snapshot.cycle_count.to_string()),
        Row::new("Cycle position", snapshot.current_cycle.to_string()),
        Row::new(
            "Task",
            if snapshot.task_completed {
                "done"
            } else {
                "in progress"
            },
        ),
    ];
    println!("{}", Table::new(rows));
}

pub(crate) fn print_statistics(stats: &Statistics) {
    let focused = i64::try_from(stats.total_focused_time_ms).unwrap_or(i64::MAX);
    let rows = vec![
        Row::new("Total focused", format_duration(focused)),
        Row::new("Pages blocked", stats.blocked_count.to_string()),
    ];
    println!("{}", Table::new(rows));
}
