use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::{broadcast, mpsc, oneshot},
};

use crate::assistant::{Command, Response};
use crate::events::FocusEvent;
use crate::grace::TabId;

pub const SOCKET_FILE: &str = "focusmate.sock";

/// IPC request from a client to the daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum IpcRequest {
    Command(Command),
    /// Keep the connection open and stream [`FocusEvent`]s; with a tab,
    /// only that tab's events plus session-wide ones are sent
    Subscribe { tab: Option<TabId> },
    Shutdown,
}

/// IPC response from the daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum IpcResponse {
    Response(Response),
    Error(String),
    Subscribed,
    Event(FocusEvent),
    Shutdown,
}

/// A request waiting for the event loop, with the channel for its answer
pub type PendingRequest = (IpcRequest, oneshot::Sender<IpcResponse>);

#[derive(Debug)]
pub struct IpcClient {
    sock_path: PathBuf,
}

impl IpcClient {
    #[must_use]
    pub fn new(sock_path: &Path) -> Self {
        Self {
            sock_path: sock_path.to_path_buf(),
        }
    }

    /// Connect and hand over the request; the write half is closed afterwards
    async fn open(&self, request: &IpcRequest) -> Result<UnixStream> {
        let mut stream = UnixStream::connect(&self.sock_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to daemon at {} (is `focusmate daemon` running?)",
                    self.sock_path.display()
                )
            })?;

        let encoded = bincode::serialize(request)?;
        stream.write_all(&encoded).await?;
        stream.shutdown().await?;
        Ok(stream)
    }

    /// # Errors
    ///
    /// Returns an error if the daemon is unreachable or answers garbage
    pub async fn send(&self, request: IpcRequest) -> Result<IpcResponse> {
        let mut stream = self.open(&request).await?;

        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).await?;
        let response: IpcResponse =
            bincode::deserialize(&buffer).context("Malformed response from daemon")?;

        Ok(response)
    }

    /// Send one assistant command and unwrap the daemon's answer
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the daemon rejects the command
    pub async fn command(&self, command: Command) -> Result<Response> {
        match self.send(IpcRequest::Command(command)).await? {
            IpcResponse::Response(response) => Ok(response),
            IpcResponse::Error(message) => Err(anyhow::anyhow!(message)),
            other => bail!("Unexpected response from daemon: {other:?}"),
        }
    }

    /// Start an event subscription
    ///
    /// Returns once the daemon has registered the subscriber, so every
    /// event raised afterwards is delivered.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon is unreachable or refuses the subscription
    pub async fn subscribe(&self, tab: Option<TabId>) -> Result<EventStream> {
        let mut stream = self.open(&IpcRequest::Subscribe { tab }).await?;
        match read_frame(&mut stream).await? {
            Some(IpcResponse::Subscribed) => Ok(EventStream { stream }),
            Some(other) => bail!("Unexpected response from daemon: {other:?}"),
            None => bail!("Daemon closed the subscription"),
        }
    }
}

/// Events pushed by the daemon over one connection
#[derive(Debug)]
pub struct EventStream {
    stream: UnixStream,
}

impl EventStream {
    /// Next event, or `None` once the daemon has gone away
    ///
    /// # Errors
    ///
    /// Returns an error if a frame cannot be read or decoded
    pub async fn next_event(&mut self) -> Result<Option<FocusEvent>> {
        match read_frame(&mut self.stream).await? {
            Some(IpcResponse::Event(event)) => Ok(Some(event)),
            Some(other) => bail!("Unexpected frame from daemon: {other:?}"),
            None => Ok(None),
        }
    }
}

// Subscription frames: u32 big-endian length, then the bincode body
async fn write_frame(stream: &mut UnixStream, response: &IpcResponse) -> Result<()> {
    let encoded = bincode::serialize(response)?;
    stream.write_u32(u32::try_from(encoded.len())?).await?;
    stream.write_all(&encoded).await?;
    Ok(())
}

async fn read_frame(stream: &mut UnixStream) -> Result<Option<IpcResponse>> {
    let len = match stream.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = vec![0u8; usize::try_from(len)?];
    stream.read_exact(&mut buf).await?;
    let response = bincode::deserialize(&buf).context("Malformed frame from daemon")?;
    Ok(Some(response))
}

fn wanted(filter: Option<TabId>, event: &FocusEvent) -> bool {
    match (filter, event.tab()) {
        (Some(want), Some(tab)) => want == tab,
        _ => true,
    }
}

async fn stream_events(
    mut stream: UnixStream,
    mut events: broadcast::Receiver<FocusEvent>,
    filter: Option<TabId>,
) -> Result<()> {
    write_frame(&mut stream, &IpcResponse::Subscribed).await?;
    log::debug!("Event subscriber attached (tab filter: {filter:?})");

    loop {
        match events.recv().await {
            Ok(event) if wanted(filter, &event) => {
                if let Err(e) = write_frame(&mut stream, &IpcResponse::Event(event)).await {
                    log::debug!("Event subscriber went away: {e}");
                    return Ok(());
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                log::warn!("Event subscriber too slow, {missed} events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

async fn serve(
    mut stream: UnixStream,
    requests: mpsc::Sender<PendingRequest>,
    events: broadcast::Sender<FocusEvent>,
) -> Result<()> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    if buf.is_empty() {
        // Connection closed
        return Ok(());
    }

    let request: IpcRequest = bincode::deserialize(&buf).context("IPC deserialize error")?;
    if let IpcRequest::Subscribe { tab } = request {
        let receiver = events.subscribe();
        // Only the receiver may outlive the daemon's sender
        drop(events);
        return stream_events(stream, receiver, tab).await;
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    requests
        .send((request, reply_tx))
        .await
        .map_err(|_| anyhow::anyhow!("Event loop stopped"))?;
    let response = reply_rx
        .await
        .unwrap_or_else(|_| IpcResponse::Error("Request dropped by the daemon".to_string()));

    let encoded = bincode::serialize(&response)?;
    stream.write_all(&encoded).await?;
    Ok(())
}

/// Accept connections, forward requests to the event loop and serve
/// event subscriptions from `events`
///
/// # Errors
///
/// Returns an error if the socket cannot be bound
pub async fn listen(
    requests: mpsc::Sender<PendingRequest>,
    events: broadcast::Sender<FocusEvent>,
    sock_path: &Path,
) -> io::Result<()> {
    if sock_path.exists() {
        fs::remove_file(sock_path)?;
    }
    let listener = UnixListener::bind(sock_path)?;
    log::info!("Listening on {}", sock_path.display());

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let requests = requests.clone();
                let events = events.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve(stream, requests, events).await {
                        log::error!("IPC request failed: {e:#}");
                    }
                });
            }
            Err(e) => {
                log::error!("IPC accept error: {e}");
            }
        }
    }
}
