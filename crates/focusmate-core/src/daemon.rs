use anyhow::{Context, Result};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use focusmate_storage::SqliteStore;

use crate::{
    assistant::{EventSources, FocusAssistant},
    clock::SystemClock,
    config::{get_data_dir, AppConfig},
    content::HttpContentExtractor,
    ipc::{listen, IpcRequest, IpcResponse, PendingRequest, SOCKET_FILE},
};

const DATABASE_FILE: &str = "focusmate.db";
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const EXTRACT_TIMEOUT: Duration = Duration::from_secs(5);
const IPC_QUEUE: usize = 32;

pub struct Daemon {
    assistant: FocusAssistant,
    sources: EventSources,
    sock_path: PathBuf,
}

impl Daemon {
    /// Wire the assistant to the on-disk store and the configured providers
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory, database or providers
    /// cannot be set up
    pub fn new(config: &AppConfig) -> Result<Self> {
        let data_dir = get_data_dir()?;
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;

        let mut store = SqliteStore::new(Some(data_dir.join(DATABASE_FILE)))?;
        if let Some(quota) = config.cache.store_quota_bytes {
            store = store.with_quota(quota);
        }
        let store = Arc::new(store);
        let classifier = Arc::new(config.build_classifier()?);
        let extractor = Arc::new(HttpContentExtractor::new(EXTRACT_TIMEOUT)?);

        let (assistant, sources) = FocusAssistant::new(
            config,
            store,
            classifier,
            extractor,
            Arc::new(SystemClock),
        );

        Ok(Self::from_parts(assistant, sources, data_dir.join(SOCKET_FILE)))
    }

    /// Daemon around an already wired assistant, serving on `sock_path`
    #[must_use]
    pub fn from_parts(
        assistant: FocusAssistant,
        sources: EventSources,
        sock_path: PathBuf,
    ) -> Self {
        Self {
            assistant,
            sources,
            sock_path,
        }
    }

    /// Run the event loop until Ctrl-C or a shutdown request
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted session cannot be restored
    pub async fn run_with_signals(mut self) -> Result<()> {
        let snapshot = self.assistant.restore().await?;
        log::info!("Daemon started ({})", snapshot.phase.description());
        if self.assistant.judge_available().await == Some(false) {
            log::warn!("AI judge is unreachable; escalated pages use the fallback verdict");
        }

        let (ipc_tx, mut ipc_rx) = mpsc::channel::<PendingRequest>(IPC_QUEUE);
        let sock_path = self.sock_path.clone();
        let events = self.assistant.event_sender();
        let listener = tokio::spawn(async move {
            if let Err(e) = listen(ipc_tx, events, &sock_path).await {
                log::error!("IPC listener failed: {e}");
            }
        });

        let mut sweep = interval(CACHE_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(fired) = self.sources.alarms.recv() => {
                    self.assistant.handle_alarm(&fired).await;
                }
                Some(expired) = self.sources.grace.recv() => {
                    self.assistant.handle_grace_expiry(&expired).await;
                }
                Some((request, reply)) = ipc_rx.recv() => {
                    let stop = matches!(request, IpcRequest::Shutdown);
                    let response = self.handle_request(request).await;
                    if reply.send(response).is_err() {
                        log::debug!("IPC client went away before the reply");
                    }
                    if stop {
                        log::info!("Shutdown requested over IPC");
                        break;
                    }
                }
                _ = sweep.tick() => {
                    self.assistant.sweep_cache().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Received Ctrl-C, shutting down...");
                    break;
                }
            }
        }

        self.assistant.shutdown();
        listener.abort();
        if self.sock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.sock_path) {
                log::warn!("Failed to remove {}: {e}", self.sock_path.display());
            }
        }
        log::info!("Daemon shut down gracefully.");
        Ok(())
    }

    async fn handle_request(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Command(command) => {
                log::debug!("IPC command: {command:?}");
                match self.assistant.dispatch(command).await {
                    Ok(response) => IpcResponse::Response(response),
                    Err(e) => {
                        log::warn!("Command rejected: {e}");
                        IpcResponse::Error(e.to_string())
                    }
                }
            }
            IpcRequest::Subscribe { .. } => {
                IpcResponse::Error("Subscriptions are served by the listener".to_string())
            }
            IpcRequest::Shutdown => IpcResponse::Shutdown,
        }
    }
}

/// Path of the daemon socket
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn socket_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(SOCKET_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::Command;
    use crate::content::{ContentExtractor, PageContent};
    use crate::events::FocusEvent;
    use crate::ipc::IpcClient;
    use async_trait::async_trait;
    use focusmate_ai::{EmbeddingProvider, EmbeddingService, RelevanceClassifier, RuleSet};
    use focusmate_storage::MemoryStore;
    use tempfile::TempDir;

    struct Neutral;

    #[async_trait]
    impl EmbeddingProvider for Neutral {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        fn model_name(&self) -> &str {
            "neutral"
        }
    }

    struct Offline;

    #[async_trait]
    impl ContentExtractor for Offline {
        async fn extract(&self, _url: &str) -> Result<PageContent> {
            anyhow::bail!("offline")
        }
    }

    fn daemon_at(sock_path: PathBuf) -> Daemon {
        let mut config = AppConfig::default();
        config.grace.period_secs = 1;
        let rules = Arc::new(RuleSet::builtin().unwrap());
        let embeddings = Arc::new(EmbeddingService::new(Arc::new(Neutral)));
        let classifier = Arc::new(RelevanceClassifier::new(rules, embeddings, None));
        let (assistant, sources) = FocusAssistant::new(
            &config,
            Arc::new(MemoryStore::new()),
            classifier,
            Arc::new(Offline),
            Arc::new(SystemClock),
        );
        Daemon::from_parts(assistant, sources, sock_path)
    }

    async fn connect(client: &IpcClient) -> crate::ipc::EventStream {
        for _ in 0..100 {
            if let Ok(stream) = client.subscribe(Some(7)).await {
                return stream;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("daemon never started listening");
    }

    #[tokio::test]
    async fn test_grace_expiry_reaches_subscriber() {
        let dir = TempDir::new().unwrap();
        let sock_path = dir.path().join(SOCKET_FILE);
        let daemon = tokio::spawn(daemon_at(sock_path.clone()).run_with_signals());

        let client = IpcClient::new(&sock_path);
        let mut events = connect(&client).await;

        client
            .command(Command::InitFocus {
                keywords: "vercel billing".to_string(),
            })
            .await
            .unwrap();
        client
            .command(Command::CheckRelevance {
                tab: 7,
                url: "https://weibo.com/search?q=vercel".to_string(),
                title: "vercel - Weibo search".to_string(),
                content: Some(PageContent::bare("vercel - Weibo search")),
            })
            .await
            .unwrap();

        let mut seen = Vec::new();
        let forced = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = events.next_event().await.unwrap() {
                if let FocusEvent::ForcedBlock { tab, .. } = event {
                    return tab;
                }
                seen.push(event);
            }
            panic!("event stream ended early");
        })
        .await
        .unwrap();

        assert_eq!(forced, 7);
        assert!(seen
            .iter()
            .any(|e| matches!(e, FocusEvent::GraceStarted { tab: 7, seconds: 1, .. })));

        assert_eq!(
            client.send(IpcRequest::Shutdown).await.unwrap(),
            IpcResponse::Shutdown
        );
        daemon.await.unwrap().unwrap();
        assert!(!sock_path.exists());
    }
}
