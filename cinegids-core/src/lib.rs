//! # cinegids Core
//!
//! Resolution pipeline for VPRO Cinema metadata. A lookup walks a fixed
//! ladder of sources and always ends in a persisted verdict:
//!
//! 1. **Disk cache** with status-dependent TTLs (negative results expire
//!    sooner than positive ones).
//! 2. **POMS pages API**, the authenticated primary source, with a single
//!    credential refresh-and-retry on auth rejection.
//! 3. **Alternate titles** from TMDB, each replayed against the primary
//!    source.
//! 4. **Web search fallback** scraping the public catalogue pages.
//!
//! All outbound traffic flows through one rate-limited HTTP client with
//! per-host token buckets. Components are wired together through the
//! traits in [`lookup`], so each stage can be swapped or mocked.

pub mod cache;
pub mod credentials;
pub mod error;
pub mod http;
pub mod lookup;
pub mod poms;
pub mod text;
pub mod tmdb;
pub mod web;

pub use cache::{CacheStats, FileCache};
pub use credentials::{CredentialManager, CredentialSource, HttpCredentialSource};
pub use error::{LookupError, Result};
pub use http::RateLimitedClient;
pub use lookup::{AlternateTitles, LookupService, PrimarySearch, WebFallback};
pub use poms::PomsClient;
pub use tmdb::TmdbClient;
pub use web::WebSearcher;

use std::sync::Arc;

use cinegids_config::Settings;

/// A fully wired pipeline plus handles to its shared state.
#[derive(Debug)]
pub struct Pipeline {
    pub cache: Arc<FileCache>,
    pub credentials: Arc<CredentialManager>,
    pub lookups: LookupService,
}

/// Wire a full pipeline from settings. This is the production assembly;
/// tests compose the pieces directly.
pub fn build_pipeline(settings: &Settings) -> Result<Pipeline> {
    let http = Arc::new(RateLimitedClient::new(settings)?);
    let credentials = Arc::new(CredentialManager::new(
        settings,
        Arc::new(HttpCredentialSource::new(http.clone())),
    )?);
    let cache = Arc::new(FileCache::new(settings)?);
    let poms = Arc::new(PomsClient::new(
        settings,
        http.clone(),
        credentials.clone(),
    ));
    let tmdb = Arc::new(TmdbClient::new(settings, http.clone()));
    let web = Arc::new(WebSearcher::new(settings, http));
    let lookups = LookupService::new(
        cache.clone(),
        credentials.clone(),
        poms,
        tmdb,
        web,
        settings.max_alternate_titles,
    );
    Ok(Pipeline {
        cache,
        credentials,
        lookups,
    })
}
