//! The resolution pipeline: cache, primary search, alternate titles, web
//! fallback, in that order.
//!
//! Every collaborator is injected behind a trait so the flow can be tested
//! without a network. Stage failures are logged and treated as misses; the
//! only errors a caller sees are cache-write failures for the final record.

use std::sync::Arc;

use async_trait::async_trait;

use cinegids_model::{
    CacheRecord, Candidate, LookupMethod, LookupQuery, MediaType,
};

use crate::cache::FileCache;
use crate::credentials::CredentialManager;
use crate::error::{LookupError, Result};
use crate::poms::PomsClient;
use crate::text;
use crate::tmdb::TmdbClient;
use crate::web::WebSearcher;

/// The authenticated catalogue search.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrimarySearch: Send + Sync {
    async fn search(
        &self,
        title: &str,
        year: Option<i32>,
        media_type: MediaType,
        imdb_known: bool,
    ) -> Result<Option<Candidate>>;
}

/// Supplies alternate titles to replay against the primary search.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlternateTitles: Send + Sync {
    async fn titles_for_imdb(&self, imdb_id: &str) -> Result<Vec<String>>;

    /// Title-based discovery; may also surface an IMDb id.
    async fn titles_for_query(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<(Option<String>, Vec<String>)>;
}

/// Last-resort resolution through web search and page scraping.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebFallback: Send + Sync {
    async fn resolve(
        &self,
        title: &str,
        year: Option<i32>,
        media_type: MediaType,
    ) -> Result<Option<Candidate>>;
}

#[async_trait]
impl PrimarySearch for PomsClient {
    async fn search(
        &self,
        title: &str,
        year: Option<i32>,
        media_type: MediaType,
        imdb_known: bool,
    ) -> Result<Option<Candidate>> {
        PomsClient::search(self, title, year, media_type, imdb_known).await
    }
}

#[async_trait]
impl AlternateTitles for TmdbClient {
    async fn titles_for_imdb(&self, imdb_id: &str) -> Result<Vec<String>> {
        TmdbClient::titles_for_imdb(self, imdb_id).await
    }

    async fn titles_for_query(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<(Option<String>, Vec<String>)> {
        TmdbClient::titles_for_query(self, title, year).await
    }
}

#[async_trait]
impl WebFallback for WebSearcher {
    async fn resolve(
        &self,
        title: &str,
        year: Option<i32>,
        media_type: MediaType,
    ) -> Result<Option<Candidate>> {
        WebSearcher::resolve(self, title, year, media_type).await
    }
}

pub struct LookupService {
    cache: Arc<FileCache>,
    credentials: Arc<CredentialManager>,
    primary: Arc<dyn PrimarySearch>,
    alternates: Arc<dyn AlternateTitles>,
    web: Arc<dyn WebFallback>,
    max_alternate_titles: usize,
}

impl LookupService {
    pub fn new(
        cache: Arc<FileCache>,
        credentials: Arc<CredentialManager>,
        primary: Arc<dyn PrimarySearch>,
        alternates: Arc<dyn AlternateTitles>,
        web: Arc<dyn WebFallback>,
        max_alternate_titles: usize,
    ) -> Self {
        Self {
            cache,
            credentials,
            primary,
            alternates,
            web,
            max_alternate_titles,
        }
    }

    /// Resolve a query to a record, always persisting the outcome. The
    /// returned record is `NotFound` when every stage came up empty; that
    /// too is cached so repeat queries stay cheap.
    pub async fn resolve(&self, query: &LookupQuery) -> Result<CacheRecord> {
        let key = query.cache_key();
        if let Some(hit) = self.cache.read(&key).await {
            tracing::info!(key, status = ?hit.status, "cache hit");
            return Ok(hit);
        }
        tracing::info!(key, title = %query.title, "cache miss, resolving");

        let imdb_known = query.imdb_id.is_some();
        // One credential refresh per resolution, no matter how many titles
        // are replayed against the primary search.
        let mut refreshed = false;

        if let Some(candidate) = self
            .primary_search(&query.title, query, imdb_known, &mut refreshed)
            .await
        {
            return self
                .persist_found(query, &key, candidate, LookupMethod::Poms, None)
                .await;
        }

        let (discovered_imdb, titles) = self.alternate_titles(query).await;
        for title in titles {
            if let Some(candidate) = self
                .primary_search(&title, query, imdb_known, &mut refreshed)
                .await
            {
                return self
                    .persist_found(
                        query,
                        &key,
                        candidate,
                        LookupMethod::TmdbAlternate,
                        discovered_imdb,
                    )
                    .await;
            }
        }

        match self
            .web
            .resolve(&query.title, query.year, query.media_type)
            .await
        {
            Ok(Some(candidate)) => {
                return self
                    .persist_found(
                        query,
                        &key,
                        candidate,
                        LookupMethod::Web,
                        discovered_imdb,
                    )
                    .await;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "web fallback failed");
            }
        }

        tracing::info!(key, title = %query.title, "no source found a match");
        let record = CacheRecord::not_found(
            key,
            query.title.clone(),
            query.year,
            query.media_type,
        );
        self.cache.write(&record).await?;
        Ok(record)
    }

    /// Primary search with a single refresh-and-retry on auth rejection.
    /// Any other failure is a miss.
    async fn primary_search(
        &self,
        title: &str,
        query: &LookupQuery,
        imdb_known: bool,
        refreshed: &mut bool,
    ) -> Option<Candidate> {
        let first = self
            .primary
            .search(title, query.year, query.media_type, imdb_known)
            .await;
        match first {
            Ok(candidate) => candidate,
            Err(LookupError::AuthRejected { status }) if !*refreshed => {
                tracing::warn!(status, "auth rejected, refreshing credentials");
                *refreshed = true;
                if !self.credentials.force_refresh().await {
                    return None;
                }
                match self
                    .primary
                    .search(title, query.year, query.media_type, imdb_known)
                    .await
                {
                    Ok(candidate) => candidate,
                    Err(e) => {
                        tracing::warn!(error = %e, "primary search retry failed");
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!(title, error = %e, "primary search failed");
                None
            }
        }
    }

    /// Alternate titles worth trying: distinct from the original under
    /// normalization, capped. Errors degrade to an empty list.
    async fn alternate_titles(
        &self,
        query: &LookupQuery,
    ) -> (Option<String>, Vec<String>) {
        let fetched = match &query.imdb_id {
            Some(imdb_id) => self
                .alternates
                .titles_for_imdb(imdb_id)
                .await
                .map(|titles| (None, titles)),
            None => {
                self.alternates
                    .titles_for_query(&query.title, query.year)
                    .await
            }
        };
        let (discovered, titles) = match fetched {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "alternate title fetch failed");
                return (None, Vec::new());
            }
        };

        let original = text::normalize_for_match(&query.title);
        let filtered: Vec<String> = titles
            .into_iter()
            .filter(|title| text::normalize_for_match(title) != original)
            .take(self.max_alternate_titles)
            .collect();
        tracing::debug!(count = filtered.len(), "alternate titles to try");
        (discovered, filtered)
    }

    async fn persist_found(
        &self,
        query: &LookupQuery,
        key: &str,
        mut candidate: Candidate,
        method: LookupMethod,
        discovered_imdb: Option<String>,
    ) -> Result<CacheRecord> {
        // A caller-supplied IMDb id is authoritative when the source had none.
        if candidate.imdb_id.is_none() {
            candidate.imdb_id = query
                .imdb_id
                .clone()
                .or_else(|| discovered_imdb.clone());
        }
        tracing::info!(
            key,
            method = %method,
            title = %candidate.title,
            "match accepted"
        );
        let record =
            candidate.into_record(key.to_string(), method, discovered_imdb);
        self.cache.write(&record).await?;
        Ok(record)
    }
}

impl std::fmt::Debug for LookupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupService")
            .field("max_alternate_titles", &self.max_alternate_titles)
            .finish_non_exhaustive()
    }
}
