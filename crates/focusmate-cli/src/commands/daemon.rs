/// Daemon lifecycle commands
use anyhow::{Context, Result};
use focusmate_core::{
    config::{get_data_dir, AppConfig},
    daemon::socket_path,
    ipc::{IpcClient, IpcRequest, IpcResponse},
    Daemon,
};

/// Run the daemon in the foreground until Ctrl-C or `focusmate shutdown`
pub async fn run_daemon() -> Result<()> {
    let log_path = setup_daemon_logging()?;
    println!("focusmate daemon running, logging to {}", log_path.display());
    log::info!("Daemon process starting");

    let config = AppConfig::load_or_default()?;
    let daemon = Daemon::new(&config).context("Failed to start daemon")?;
    if let Err(e) = daemon.run_with_signals().await {
        log::error!("Daemon exited with a fatal error: {e:#}");
        return Err(e);
    }
    Ok(())
}

pub async fn shutdown_daemon() -> Result<()> {
    let sock_path = socket_path()?;
    if !sock_path.exists() {
        println!("Daemon is not running.");
        return Ok(());
    }

    let client = IpcClient::new(&sock_path);
    match client.send(IpcRequest::Shutdown).await {
        Ok(IpcResponse::Shutdown) => println!("Daemon stopped."),
        Ok(resp) => log::error!("Received unexpected response from daemon: {resp:?}"),
        Err(e) => {
            log::error!("Failed to send shutdown command: {e:#}");
            println!("Daemon did not answer; removing stale socket.");
            std::fs::remove_file(&sock_path)?;
        }
    }
    Ok(())
}

fn setup_daemon_logging() -> Result<std::path::PathBuf> {
    use std::fs::{create_dir_all, OpenOptions};

    let log_path = get_data_dir()?.join("focusmate.log");

    if let Some(parent) = log_path.parent() {
        create_dir_all(parent)?;
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open {}", log_path.display()))?;

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter_level(log::LevelFilter::Debug)
        .format_timestamp_secs()
        .init();

    Ok(log_path)
}
