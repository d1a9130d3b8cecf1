use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use focusmate_ai::{
    create_embedding_provider, create_provider, AiConfig, EmbeddingService, RelevanceClassifier,
    RelevanceJudge, RuleSet,
};

use crate::cache::{DEFAULT_MAX_BYTES, DEFAULT_TTL_HOURS};
use crate::grace::DEFAULT_GRACE_PERIOD;
use crate::scheduler::SchedulerConfig;

const CONFIG_FILE: &str = "config.toml";

/// Get the local data directory for focusmate.
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn get_data_dir() -> Result<PathBuf> {
    let mut path =
        dirs::data_local_dir().ok_or_else(|| anyhow::anyhow!("Failed to get local data dir"))?;
    path.push("focusmate");
    Ok(path)
}

/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn config_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(CONFIG_FILE))
}

/// `[timer]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub focus_minutes: u32,
    pub short_break_minutes: u32,
    pub long_break_minutes: u32,
    pub sessions_per_long_break: u8,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            focus_minutes: 25,
            short_break_minutes: 5,
            long_break_minutes: 15,
            sessions_per_long_break: 4,
        }
    }
}

impl TimerConfig {
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            focus: chrono::Duration::minutes(i64::from(self.focus_minutes.max(1))),
            short_break: chrono::Duration::minutes(i64::from(self.short_break_minutes.max(1))),
            long_break: chrono::Duration::minutes(i64::from(self.long_break_minutes.max(1))),
            long_break_every: self.sessions_per_long_break.max(1),
        }
    }
}

/// `[cache]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_hours: u32,
    pub max_bytes: usize,
    /// Byte quota for the whole on-disk store; unlimited when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_quota_bytes: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_hours: u32::try_from(DEFAULT_TTL_HOURS).unwrap_or(24),
            max_bytes: DEFAULT_MAX_BYTES,
            store_quota_bytes: None,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.ttl_hours))
    }
}

/// `[grace]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraceConfig {
    pub period_secs: u64,
}

impl Default for GraceConfig {
    fn default() -> Self {
        Self {
            period_secs: DEFAULT_GRACE_PERIOD.as_secs(),
        }
    }
}

impl GraceConfig {
    #[must_use]
    pub fn period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.period_secs.max(1))
    }
}

/// Application configuration, read from `<data_dir>/config.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Rule set replacing the built-in one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_path: Option<PathBuf>,
    pub ai: AiConfig,
    pub timer: TimerConfig,
    pub cache: CacheConfig,
    pub grace: GraceConfig,
}

impl AppConfig {
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Config from the default location, or defaults when none exists
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file is unreadable or malformed
    pub fn load_or_default() -> Result<Self> {
        let path = config_path()?;
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        log::info!("Config written to {}", path.display());
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the rule file cannot be loaded or is invalid
    pub fn rules(&self) -> Result<RuleSet> {
        match &self.rules_path {
            Some(path) => RuleSet::load(path),
            None => RuleSet::builtin(),
        }
    }

    /// Build the classifier for this configuration
    ///
    /// The judge is only wired in when `[ai] enabled` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the rules or a provider cannot be set up
    pub fn build_classifier(&self) -> Result<RelevanceClassifier> {
        let rules = Arc::new(self.rules()?);
        let embedder =
            create_embedding_provider(&self.ai).context("Failed to set up embeddings")?;
        let embeddings = Arc::new(EmbeddingService::new(embedder));

        let judge = if self.ai.enabled {
            let provider = create_provider(&self.ai).context("Failed to set up AI provider")?;
            log::info!(
                "Relevance judge: {} ({})",
                self.ai.provider,
                provider.model_name()
            );
            Some(RelevanceJudge::new(provider, Arc::clone(&rules)))
        } else {
            log::info!("AI judge disabled, escalations use the semantic score");
            None
        };

        Ok(RelevanceClassifier::new(rules, embeddings, judge).with_timeout(self.ai.timeout()))
    }
}
