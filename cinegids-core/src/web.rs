//! Last-resort resolution through public web search.
//!
//! Two HTML search engines are queried for links into the VPRO cinema
//! catalogue; matching pages are scraped directly. Bot-protection pages are
//! recognized by engine-specific DOM signatures, never by keyword scanning,
//! so a film page that happens to mention "captcha" is not misclassified.
//!
//! `scraper::Html` is not `Send`; all document parsing happens in sync
//! helpers that return plain data before the next await point.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use cinegids_config::Settings;
use cinegids_model::{Candidate, MediaType};

use crate::error::{LookupError, Result};
use crate::http::RateLimitedClient;
use crate::text;

static IMDB_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(?:www\.)?imdb\.com/title/(tt\d{7,10})").unwrap()
});
static KIJKWIJZER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)kijkwijzer[^0-9a-z]{0,20}\b(AL|6|9|12|14|16|18)\b")
        .unwrap()
});
static CREDIT_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<dt[^>]*>\s*(regie|genre)\s*:?\s*</dt>\s*<dd[^>]*>(.*?)</dd>")
        .unwrap()
});

const MAX_RESULT_LINKS: usize = 5;
const MIN_ARTICLE_PARAGRAPH_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Engine {
    DuckDuckGo,
    Startpage,
}

impl Engine {
    fn name(&self) -> &'static str {
        match self {
            Engine::DuckDuckGo => "duckduckgo",
            Engine::Startpage => "startpage",
        }
    }

    fn search_url(&self, query: &str) -> String {
        let encoded = urlencoding::encode(query);
        match self {
            Engine::DuckDuckGo => {
                format!("https://html.duckduckgo.com/html/?q={encoded}")
            }
            Engine::Startpage => {
                format!("https://www.startpage.com/sp/search?query={encoded}")
            }
        }
    }
}

/// Searches the open web for VPRO cinema pages and scrapes them.
#[derive(Debug)]
pub struct WebSearcher {
    http: Arc<RateLimitedClient>,
    similarity_threshold: f64,
    year_tolerance: i32,
}

impl WebSearcher {
    pub fn new(settings: &Settings, http: Arc<RateLimitedClient>) -> Self {
        Self {
            http,
            similarity_threshold: settings.title_similarity_threshold,
            year_tolerance: settings.year_tolerance,
        }
    }

    /// Full fallback pass: search, then scrape results until one page
    /// yields a candidate whose title and year fit the query.
    pub async fn resolve(
        &self,
        title: &str,
        year: Option<i32>,
        media_type: MediaType,
    ) -> Result<Option<Candidate>> {
        let links = self.search(title, year).await?;
        for link in links {
            match self.scrape_page(&link, media_type).await {
                Ok(Some(candidate)) => {
                    if self.accepts(title, year, &candidate) {
                        return Ok(Some(candidate));
                    }
                    tracing::debug!(
                        url = %link,
                        scraped = %candidate.title,
                        "scraped page does not match query"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(url = %link, error = %e, "page scrape failed");
                }
            }
        }
        Ok(None)
    }

    fn accepts(&self, title: &str, year: Option<i32>, candidate: &Candidate) -> bool {
        let title_ok = text::titles_match(title, &candidate.title)
            || text::title_similarity(title, &candidate.title)
                > self.similarity_threshold;
        title_ok
            && text::years_compatible(candidate.year, year, self.year_tolerance)
    }

    /// Catalogue links from the first engine that is not blocking us.
    pub async fn search(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<Vec<Url>> {
        let query = match year {
            Some(year) => {
                format!("site:vprogids.nl/cinema \"{title}\" {year}")
            }
            None => format!("site:vprogids.nl/cinema \"{title}\""),
        };

        for engine in [Engine::DuckDuckGo, Engine::Startpage] {
            match self.search_engine(engine, &query).await {
                Ok(links) if !links.is_empty() => return Ok(links),
                Ok(_) => {
                    tracing::debug!(engine = engine.name(), "no catalogue links found");
                }
                Err(LookupError::BotProtection { engine }) => {
                    tracing::warn!(engine, "search engine blocked us, trying next");
                }
                Err(e) => {
                    tracing::debug!(engine = engine.name(), error = %e, "engine search failed");
                }
            }
        }
        Ok(Vec::new())
    }

    async fn search_engine(
        &self,
        engine: Engine,
        query: &str,
    ) -> Result<Vec<Url>> {
        let url = Url::parse(&engine.search_url(query))
            .map_err(|e| LookupError::Internal(format!("search url: {e}")))?;
        let response = self.http.get(&url).await?;
        let body = response.text().await?;
        extract_result_links(engine, &body)
    }

    async fn scrape_page(
        &self,
        url: &Url,
        media_type: MediaType,
    ) -> Result<Option<Candidate>> {
        let response = self.http.get(url).await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let body = response.text().await?;
        Ok(scrape_film_page(&body, url, media_type))
    }
}

/// Engine-specific DOM markers for interstitial challenge pages.
fn is_bot_protected(engine: Engine, document: &Html) -> bool {
    let signatures: &[&str] = match engine {
        Engine::DuckDuckGo => &[
            "#anomaly-modal",
            "div.anomaly-modal__mask",
            "form#challenge-form",
        ],
        Engine::Startpage => &[
            "form[action*='/sp/captcha']",
            "#captcha-container",
            "div.captcha",
        ],
    };
    signatures.iter().any(|sig| {
        Selector::parse(sig)
            .map(|sel| document.select(&sel).next().is_some())
            .unwrap_or(false)
    })
}

fn extract_result_links(engine: Engine, body: &str) -> Result<Vec<Url>> {
    let document = Html::parse_document(body);
    if is_bot_protected(engine, &document) {
        return Err(LookupError::BotProtection {
            engine: engine.name().to_string(),
        });
    }

    let selector = Selector::parse("a[href]").unwrap();
    let mut links = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(target) = unwrap_redirect(engine, href) else {
            continue;
        };
        if is_catalogue_url(&target) && seen.insert(target.to_string()) {
            links.push(target);
            if links.len() >= MAX_RESULT_LINKS {
                break;
            }
        }
    }
    Ok(links)
}

/// DuckDuckGo wraps result targets in a redirect with a `uddg` parameter.
fn unwrap_redirect(engine: Engine, href: &str) -> Option<Url> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let url = Url::parse(&absolute).ok()?;
    if engine == Engine::DuckDuckGo
        && url.path().starts_with("/l/")
        && let Some((_, target)) =
            url.query_pairs().find(|(key, _)| key == "uddg")
    {
        return Url::parse(&target).ok();
    }
    Some(url)
}

fn is_catalogue_url(url: &Url) -> bool {
    let host_ok = url
        .host_str()
        .is_some_and(|h| h == "vprogids.nl" || h.ends_with(".vprogids.nl"));
    host_ok && url.path().starts_with("/cinema/")
}

/// Pull a candidate out of a catalogue film page.
fn scrape_film_page(
    body: &str,
    url: &Url,
    media_type: MediaType,
) -> Option<Candidate> {
    let document = Html::parse_document(body);

    let h1 = Selector::parse("h1").unwrap();
    let heading = document
        .select(&h1)
        .map(|el| el.text().collect::<String>())
        .map(|t| t.trim().to_string())
        .find(|t| !t.is_empty())?;
    // Headings often carry the year in parentheses.
    let year_from_heading = text::extract_year(&heading);
    let title = heading
        .split('(')
        .next()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())?;

    let mut candidate = Candidate::new(title, media_type);
    candidate.source_url = Some(url.to_string());
    candidate.vpro_id = text::extract_vpro_id(url.as_str());
    candidate.year = year_from_heading.or_else(|| {
        // Fall back to the first plausible year in the page body text.
        let page_text: String = document
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join(" ");
        text::extract_year(&page_text)
    });
    candidate.description = extract_description(&document);
    candidate.imdb_id = IMDB_LINK
        .captures(body)
        .map(|caps| caps[1].to_string());
    candidate.content_rating = KIJKWIJZER
        .captures(body)
        .map(|caps| caps[1].to_uppercase());

    for caps in CREDIT_ROW.captures_iter(body) {
        let value = text::sanitize_description(&caps[2]);
        if value.is_empty() {
            continue;
        }
        match caps[1].to_lowercase().as_str() {
            "regie" if candidate.director.is_none() => {
                candidate.director = Some(value);
            }
            "genre" if candidate.genres.is_empty() => {
                candidate.genres = value
                    .split(',')
                    .map(|g| g.trim().to_string())
                    .filter(|g| !g.is_empty())
                    .collect();
            }
            _ => {}
        }
    }

    Some(candidate)
}

/// Description sources in preference order: blockquote, a long article
/// paragraph, known intro containers, finally the og:description meta.
fn extract_description(document: &Html) -> Option<String> {
    let candidates = [
        ("blockquote p", false),
        ("blockquote", false),
        ("article p", true),
        (".intro, .description, .lead", false),
    ];
    for (raw_selector, needs_length) in candidates {
        let Ok(selector) = Selector::parse(raw_selector) else {
            continue;
        };
        for element in document.select(&selector) {
            let raw = element.text().collect::<String>();
            if needs_length && raw.trim().len() < MIN_ARTICLE_PARAGRAPH_CHARS
            {
                continue;
            }
            let clean = text::sanitize_description(&raw);
            if text::is_valid_description(&clean) {
                return Some(clean);
            }
        }
    }

    let meta = Selector::parse(
        "meta[property='og:description'], meta[name='description']",
    )
    .ok()?;
    for element in document.select(&meta) {
        if let Some(content) = element.value().attr("content") {
            let clean = text::sanitize_description(content);
            if text::is_valid_description(&clean) {
                return Some(clean);
            }
        }
    }
    None
}
