//! One-shot relevance check, classified locally without the daemon

use anyhow::{bail, Context, Result};
use focusmate_ai::{Classification, PageRequest};
use focusmate_core::{
    AppConfig, Command, ContentExtractor, HttpContentExtractor, PageContent, Response,
};
use std::time::Duration;
use tabled::{Table, Tabled};

use super::helpers::truncate_str;
use super::session::send;

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Tabled)]
struct VerdictRow {
    #[tabled(rename = "Verdict")]
    status: String,
    #[tabled(rename = "Score")]
    score: u8,
    #[tabled(rename = "Decided by")]
    source: String,
    #[tabled(rename = "Grace")]
    grace: &'static str,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Classify one page against the given keywords
///
/// Without `--title` the page is fetched and its title and text are used.
/// Without `--keywords` the running session's keywords are used.
///
/// # Errors
///
/// Returns an error if no keywords are available, the page cannot be fetched
/// or the classifier rejects the input
pub async fn check_command(
    url: String,
    title: Option<String>,
    snippet: Option<String>,
    keywords: Option<String>,
) -> Result<()> {
    let keywords = match keywords {
        Some(k) if !k.trim().is_empty() => k,
        _ => session_keywords().await?,
    };

    let page = match title {
        Some(title) => PageContent {
            content_snippet: snippet.unwrap_or_default(),
            ..PageContent::bare(&title)
        },
        None => {
            let extractor = HttpContentExtractor::new(FETCH_TIMEOUT)?;
            let mut page = extractor.extract(&url).await?;
            if let Some(snippet) = snippet {
                page.content_snippet = snippet;
            }
            page
        }
    };

    let config = AppConfig::load_or_default()?;
    let classifier = config.build_classifier()?;
    let request = PageRequest::new(&keywords, page.best_title(""), &url)
        .with_snippet(page.snippet().map(str::to_string));
    let result = classifier
        .classify(&request)
        .await
        .context("Classification failed")?;

    println!("Keywords: {keywords}");
    println!("Page:     {}", truncate_str(&request.title, 60));
    if classifier.judge_available().await == Some(false) {
        println!("Note: the AI judge is unreachable, escalations use the fallback verdict");
    }
    print_classification(&result);
    Ok(())
}

pub(crate) fn print_classification(result: &Classification) {
    let row = VerdictRow {
        status: result.status.to_string(),
        score: result.score,
        source: result.source.to_string(),
        grace: if result.requires_grace_period {
            "yes"
        } else {
            "no"
        },
        reason: truncate_str(&result.reason, 60),
    };
    println!("{}", Table::new(vec![row]));
}

async fn session_keywords() -> Result<String> {
    let response = send(Command::GetState)
        .await
        .context("No --keywords given and the daemon is not reachable")?;
    match response {
        Response::State(snapshot) => match snapshot.keywords {
            Some(keywords) => Ok(keywords),
            None => bail!("No focus session running; pass --keywords"),
        },
        other => bail!("Unexpected response from daemon: {other:?}"),
    }
}
