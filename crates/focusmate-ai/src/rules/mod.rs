
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Rule set compiled into the binary
const BUILTIN_RULES: &str = include_str!("../../rules/default.toml");

/// Score thresholds driving the override and tier logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub fast_pass: u8,
    pub fast_block: u8,
    pub meta_task_floor: u8,
    pub toolchain_trigger: u8,
    pub toolchain_floor: u8,
    pub fast_pass_score: u8,
    pub fast_block_score: u8,
    pub interference_score: u8,
    pub stay_threshold: u8,
    pub documentation_min: u8,
    pub documentation_max: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainLists {
    /// Social, entertainment, news and gaming domains
    pub interference: Vec<String>,
    /// Developer tool vendors
    pub toolchain: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaTaskKeywords {
    pub chinese: Vec<String>,
    pub english: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolchainKeywords {
    pub tools: Vec<String>,
    pub documentation: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordLists {
    pub documentation_markers: Vec<String>,
    pub meta_task: MetaTaskKeywords,
    pub toolchain: ToolchainKeywords,
}

/// User-facing strings for one language
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageCatalog {
    pub interference_search: String,
    pub fast_pass: String,
    pub fast_block: String,
    pub fallback: String,
    /// `{seconds}` is replaced with the grace period length
    pub grace_started: String,
    pub grace_expired: String,
    pub blocked: String,
}

impl MessageCatalog {
    #[must_use]
    pub fn grace_started(&self, seconds: u64) -> String {
        self.grace_started.replace("{seconds}", &seconds.to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Messages {
    pub en: MessageCatalog,
    pub zh: MessageCatalog,
}

/// Language the user-facing reason is written in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Chinese,
}

impl Language {
    /// Chinese if the focus keywords contain any CJK ideograph
    #[must_use]
    pub fn detect(text: &str) -> Self {
        let is_cjk =
            |c: char| ('\u{4e00}'..='\u{9fff}').contains(&c) || ('\u{3400}'..='\u{4dbf}').contains(&c);
        if text.chars().any(is_cjk) {
            Self::Chinese
        } else {
            Self::English
        }
    }
}

/// Versioned domain lists, keyword lists and thresholds for the classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub version: u32,
    pub thresholds: Thresholds,
    pub domains: DomainLists,
    pub keywords: KeywordLists,
    pub messages: Messages,
}

/// Rule-derived facts about one page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSignals {
    pub domain: Option<String>,
    pub interference_domain: bool,
    pub toolchain_domain: bool,
    pub meta_task_keyword: bool,
    pub toolchain_keyword: bool,
    pub documentation_page: bool,
}

impl RuleSet {
    /// Rules shipped with the binary
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded rules fail to parse or validate
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_RULES).context("Built-in rule set is invalid")
    }

    /// Parse a rule set from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or the thresholds are inconsistent
    pub fn from_toml(text: &str) -> Result<Self> {
        let mut rules: Self = toml::from_str(text).context("Failed to parse rule set")?;
        rules.normalize();
        rules.validate()?;
        log::debug!(
            "Loaded rule set v{} ({} interference, {} toolchain domains)",
            rules.version,
            rules.domains.interference.len(),
            rules.domains.toolchain.len()
        );
        Ok(rules)
    }

    /// Load a rule set from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules from {}", path.display()))?;
        Self::from_toml(&text)
    }

    fn normalize(&mut self) {
        let lower = |list: &mut Vec<String>| {
            for item in list.iter_mut() {
                *item = item.trim().to_lowercase();
            }
            list.retain(|item| !item.is_empty());
        };
        lower(&mut self.domains.interference);
        lower(&mut self.domains.toolchain);
        lower(&mut self.keywords.documentation_markers);
        lower(&mut self.keywords.meta_task.chinese);
        lower(&mut self.keywords.meta_task.english);
        lower(&mut self.keywords.toolchain.tools);
        lower(&mut self.keywords.toolchain.documentation);
    }

    /// Check that the escalation band is reachable from every override
    ///
    /// # Errors
    ///
    /// Returns an error describing the first inconsistent threshold
    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        if t.fast_pass > 100 || t.fast_block_score > 100 || t.fast_pass_score > 100 {
            anyhow::bail!("scores must be within 0-100");
        }
        if t.fast_block >= t.fast_pass {
            anyhow::bail!(
                "fast_block ({}) must be below fast_pass ({})",
                t.fast_block,
                t.fast_pass
            );
        }
        for (name, floor) in [
            ("meta_task_floor", t.meta_task_floor),
            ("toolchain_floor", t.toolchain_floor),
        ] {
            if floor <= t.fast_block || floor >= t.fast_pass {
                anyhow::bail!(
                    "{name} ({floor}) must sit strictly between fast_block ({}) and fast_pass ({})",
                    t.fast_block,
                    t.fast_pass
                );
            }
        }
        if t.documentation_min > t.documentation_max || t.documentation_max > 100 {
            anyhow::bail!(
                "documentation band {}-{} is invalid",
                t.documentation_min,
                t.documentation_max
            );
        }
        Ok(())
    }

    #[must_use]
    pub fn messages(&self, language: Language) -> &MessageCatalog {
        match language {
            Language::English => &self.messages.en,
            Language::Chinese => &self.messages.zh,
        }
    }

    /// Exact or subdomain match against the interference blacklist
    #[must_use]
    pub fn is_interference_domain(&self, domain: &str) -> bool {
        self.domains
            .interference
            .iter()
            .any(|d| domain == d || is_subdomain_of(domain, d))
    }

    /// Exact, subdomain or substring match against the toolchain allowlist
    #[must_use]
    pub fn is_toolchain_domain(&self, domain: &str) -> bool {
        self.domains
            .toolchain
            .iter()
            .any(|d| domain == d || is_subdomain_of(domain, d) || domain.contains(d.as_str()))
    }

    #[must_use]
    pub fn has_meta_task_keyword(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        contains_any(&text, &self.keywords.meta_task.chinese)
            || contains_any(&text, &self.keywords.meta_task.english)
    }

    #[must_use]
    pub fn has_toolchain_keyword(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        contains_any(&text, &self.keywords.toolchain.tools)
            || contains_any(&text, &self.keywords.toolchain.documentation)
    }

    /// Documentation markers in the URL or title on a toolchain domain
    #[must_use]
    pub fn is_documentation_page(&self, url: &str, title: &str) -> bool {
        let Some(domain) = extract_domain(url) else {
            return false;
        };
        let text = format!("{url} {title}").to_lowercase();
        self.is_toolchain_domain(&domain) && contains_any(&text, &self.keywords.documentation_markers)
    }

    /// Evaluate every domain and keyword rule for a page
    #[must_use]
    pub fn signals(&self, url: &str, title: &str, snippet: Option<&str>) -> PageSignals {
        let domain = extract_domain(url);
        let text = format!("{url} {title} {}", snippet.unwrap_or_default());

        let (interference_domain, toolchain_domain) = match domain.as_deref() {
            Some(d) => (self.is_interference_domain(d), self.is_toolchain_domain(d)),
            None => {
                log::debug!("Could not extract domain from URL: {url}");
                (false, false)
            }
        };

        PageSignals {
            interference_domain,
            toolchain_domain,
            meta_task_keyword: self.has_meta_task_keyword(&text),
            toolchain_keyword: self.has_toolchain_keyword(&text),
            documentation_page: self.is_documentation_page(url, title),
            domain,
        }
    }
}

/// Lower-cased hostname without a leading `www.`; `None` if the URL does not parse
#[must_use]
pub fn extract_domain(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").map(str::to_string).unwrap_or(host);
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

fn is_subdomain_of(domain: &str, parent: &str) -> bool {
    domain
        .strip_suffix(parent)
        .is_some_and(|prefix| prefix.ends_with('.'))
}

fn contains_any(text: &str, needles: &[String]) -> bool {
    needles.iter().any(|needle| text.contains(needle.as_str()))
}
