//! API credential scraping, caching, and refresh.
//!
//! The search API signs requests with a key pair published inside the
//! public site's JavaScript. The manager keeps the last working pair in
//! memory behind an `RwLock` (reads never block on a refresh), persists it
//! to disk atomically, and serializes refresh attempts behind a mutex with
//! a cooldown so a burst of 401s cannot hammer the credential page.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use scraper::{Html, Selector};
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use cinegids_config::Settings;
use cinegids_model::Credentials;

use crate::error::{LookupError, Result};
use crate::http::RateLimitedClient;

/// One paired key/secret extraction strategy.
struct Extractor {
    name: &'static str,
    key_pattern: Regex,
    secret_pattern: Regex,
}

impl Extractor {
    fn apply(&self, text: &str) -> Option<(String, String)> {
        let key = self.key_pattern.captures(text)?[1].to_string();
        let secret = self.secret_pattern.captures(text)?[1].to_string();
        Some((key, secret))
    }
}

/// Ordered most-specific-first; the first strategy yielding both tokens
/// from a given document wins.
static EXTRACTORS: Lazy<Vec<Extractor>> = Lazy::new(|| {
    let ci = |pattern: &str| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .unwrap()
    };
    vec![
        Extractor {
            name: "vpronl-vars",
            key_pattern: Regex::new(
                r#"vpronlApiKey\s*[=:]\s*["']([a-z0-9]{8,15})["']"#,
            )
            .unwrap(),
            secret_pattern: Regex::new(
                r#"vpronlSecret\s*[=:]\s*["']([a-z0-9]{8,15})["']"#,
            )
            .unwrap(),
        },
        Extractor {
            name: "json-fields",
            key_pattern: Regex::new(r#""apiKey"\s*:\s*"([a-z0-9]{8,15})""#)
                .unwrap(),
            secret_pattern: Regex::new(
                r#""(?:apiSecret|secret)"\s*:\s*"([a-z0-9]{8,15})""#,
            )
            .unwrap(),
        },
        Extractor {
            name: "loose-assignment",
            key_pattern: ci(r#"apiKey\s*[=:]\s*["']([a-z0-9]{8,15})["']"#),
            secret_pattern: ci(
                r#"(?:apiSecret|secret)\s*[=:]\s*["']([a-z0-9]{8,15})["']"#,
            ),
        },
    ]
});

/// Fetches credential-bearing documents. Split out so refresh behavior can
/// be tested without a network.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// Production source backed by the shared rate-limited client.
pub struct HttpCredentialSource {
    http: Arc<RateLimitedClient>,
}

impl HttpCredentialSource {
    pub fn new(http: Arc<RateLimitedClient>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl CredentialSource for HttpCredentialSource {
    async fn fetch(&self, url: &Url) -> Result<String> {
        let response = self.http.get(url).await?;
        Ok(response.text().await?)
    }
}

struct RefreshState {
    last_attempt: Option<Instant>,
}

pub struct CredentialManager {
    source: Arc<dyn CredentialSource>,
    current: RwLock<Credentials>,
    refresh: Mutex<RefreshState>,
    cooldown: Duration,
    page_url: Url,
    file_path: PathBuf,
}

impl CredentialManager {
    /// Load the persisted pair if one exists; otherwise start from the
    /// built-in defaults. A corrupt file is discarded, not fatal.
    pub fn new(
        settings: &Settings,
        source: Arc<dyn CredentialSource>,
    ) -> Result<Self> {
        let page_url = Url::parse(&settings.credential_page)
            .map_err(|e| LookupError::Internal(format!("credential page url: {e}")))?;
        let initial = match std::fs::read_to_string(&settings.credentials_file) {
            Ok(raw) => match serde_json::from_str::<Credentials>(&raw) {
                Ok(creds) if creds.is_usable() => {
                    tracing::debug!(source = %creds.source, "loaded persisted credentials");
                    creds
                }
                Ok(_) | Err(_) => {
                    tracing::warn!(
                        path = %settings.credentials_file.display(),
                        "corrupt credential file, falling back to builtin pair"
                    );
                    let _ = std::fs::remove_file(&settings.credentials_file);
                    Credentials::builtin()
                }
            },
            Err(_) => Credentials::builtin(),
        };
        Ok(Self {
            source,
            current: RwLock::new(initial),
            refresh: Mutex::new(RefreshState { last_attempt: None }),
            cooldown: settings.credential_refresh_cooldown,
            page_url,
            file_path: settings.credentials_file.clone(),
        })
    }

    /// The active pair. Never blocks on a refresh in progress.
    pub fn current(&self) -> Credentials {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Attempt a refresh, honoring the cooldown. Returns whether usable
    /// credentials are available afterwards (a failed scrape keeps the old
    /// pair, so this is normally still true).
    pub async fn force_refresh(&self) -> bool {
        let mut state = self.refresh.lock().await;
        if let Some(last) = state.last_attempt
            && last.elapsed() < self.cooldown
        {
            tracing::debug!("credential refresh suppressed by cooldown");
            return self.current().is_usable();
        }
        state.last_attempt = Some(Instant::now());

        match self.scrape().await {
            Ok(creds) => {
                tracing::info!(source = %creds.source, "credentials refreshed");
                self.replace(creds.clone());
                if let Err(e) = self.persist(&creds) {
                    tracing::warn!(error = %e, "failed to persist credentials");
                }
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "credential refresh failed, keeping previous pair");
                self.current().is_usable()
            }
        }
    }

    fn replace(&self, creds: Credentials) {
        match self.current.write() {
            Ok(mut guard) => *guard = creds,
            Err(poisoned) => *poisoned.into_inner() = creds,
        }
    }

    /// Atomic write: temp file in the target directory, then rename.
    fn persist(&self, creds: &Credentials) -> Result<()> {
        let dir = self
            .file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;
        let tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&tmp, creds)?;
        tmp.persist(&self.file_path)
            .map_err(|e| LookupError::Io(e.error))?;
        Ok(())
    }

    /// Fetch the credential page and run the extractor list; when the page
    /// itself yields nothing, follow its external scripts in order.
    async fn scrape(&self) -> Result<Credentials> {
        let page = self.source.fetch(&self.page_url).await?;
        if let Some(creds) = extract_from(&page, self.page_url.as_str()) {
            return Ok(creds);
        }

        // Html is not Send, so script URLs are collected before any await.
        let scripts = script_urls(&page, &self.page_url);
        tracing::debug!(count = scripts.len(), "page had no inline credentials, trying scripts");
        for script_url in scripts {
            match self.source.fetch(&script_url).await {
                Ok(body) => {
                    if let Some(creds) =
                        extract_from(&body, script_url.as_str())
                    {
                        return Ok(creds);
                    }
                }
                Err(e) => {
                    tracing::debug!(url = %script_url, error = %e, "script fetch failed");
                }
            }
        }
        Err(LookupError::Internal(
            "no credential pair found in page or scripts".to_string(),
        ))
    }
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("page_url", &self.page_url.as_str())
            .field("file_path", &self.file_path)
            .finish_non_exhaustive()
    }
}

fn extract_from(text: &str, origin: &str) -> Option<Credentials> {
    for extractor in EXTRACTORS.iter() {
        if let Some((key, secret)) = extractor.apply(text) {
            tracing::debug!(strategy = extractor.name, origin, "extracted credential pair");
            return Some(Credentials::scraped(key, secret, origin.to_string()));
        }
    }
    None
}

/// External script URLs referenced by the page, resolved against it.
fn script_urls(page: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(page);
    let selector = Selector::parse("script[src]").unwrap();
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("src"))
        .filter_map(|src| base.join(src).ok())
        .collect()
}
