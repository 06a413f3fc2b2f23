//! Environment-driven settings for the cinegids pipeline.
//!
//! Everything has a working default; environment variables (optionally from
//! a `.env` file) override individual fields.
#![allow(missing_docs)]

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Per-host token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RateLimit {
    /// Sustained requests per second.
    pub per_second: f64,
    /// Burst capacity in tokens.
    pub burst: f64,
}

/// Full pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    // Cache settings
    pub cache_dir: PathBuf,
    pub credentials_file: PathBuf,
    pub found_ttl: Duration,
    pub not_found_ttl: Duration,
    pub max_cache_entries: usize,
    pub max_cache_bytes: u64,

    // HTTP settings
    pub user_agent: String,
    pub request_timeout: Duration,
    pub acquire_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff_base: Duration,

    // Rate limits per backend host
    pub poms_rate: RateLimit,
    pub tmdb_rate: RateLimit,
    pub search_rate: RateLimit,
    pub vpro_rate: RateLimit,

    // POMS endpoint settings
    pub poms_base: String,
    pub poms_origin: String,
    pub poms_profile: String,
    pub credential_page: String,
    pub credential_refresh_cooldown: Duration,

    // TMDB settings
    pub tmdb_base: String,
    pub tmdb_api_key: Option<String>,

    // Match policy
    pub title_similarity_threshold: f64,
    pub year_tolerance: i32,
    pub max_alternate_titles: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache/lookups"),
            credentials_file: PathBuf::from("./cache/credentials.json"),
            found_ttl: Duration::from_secs(30 * 24 * 3600),
            not_found_ttl: Duration::from_secs(7 * 24 * 3600),
            max_cache_entries: 10_000,
            max_cache_bytes: 500 * 1024 * 1024,

            user_agent: concat!(
                "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) ",
                "Gecko/20100101 Firefox/128.0"
            )
            .to_string(),
            request_timeout: Duration::from_secs(20),
            acquire_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff_base: Duration::from_secs(2),

            poms_rate: RateLimit {
                per_second: 5.0,
                burst: 3.0,
            },
            tmdb_rate: RateLimit {
                per_second: 4.0,
                burst: 5.0,
            },
            search_rate: RateLimit {
                per_second: 0.5,
                burst: 2.0,
            },
            vpro_rate: RateLimit {
                per_second: 2.0,
                burst: 3.0,
            },

            poms_base: "https://rs.poms.omroep.nl/v1/api".to_string(),
            poms_origin: "https://www.vprogids.nl".to_string(),
            poms_profile: "vprocinema".to_string(),
            credential_page: "https://www.vprogids.nl/cinema/zoek.html"
                .to_string(),
            credential_refresh_cooldown: Duration::from_secs(60),

            tmdb_base: "https://api.themoviedb.org/3".to_string(),
            tmdb_api_key: None,

            title_similarity_threshold: 0.7,
            year_tolerance: 2,
            max_alternate_titles: 5,
        }
    }
}

impl Settings {
    /// Load settings, letting environment variables override the defaults.
    pub fn from_env() -> Self {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Self {
            cache_dir: env_path("CINEGIDS_CACHE_DIR", defaults.cache_dir),
            credentials_file: env_path(
                "CINEGIDS_CREDENTIALS_FILE",
                defaults.credentials_file,
            ),
            found_ttl: env_secs("CINEGIDS_FOUND_TTL_SECS", defaults.found_ttl),
            not_found_ttl: env_secs(
                "CINEGIDS_NOT_FOUND_TTL_SECS",
                defaults.not_found_ttl,
            ),
            max_cache_entries: env_parse(
                "CINEGIDS_MAX_CACHE_ENTRIES",
                defaults.max_cache_entries,
            ),
            max_cache_bytes: env_parse(
                "CINEGIDS_MAX_CACHE_BYTES",
                defaults.max_cache_bytes,
            ),

            user_agent: env_string("CINEGIDS_USER_AGENT", defaults.user_agent),
            request_timeout: env_secs(
                "CINEGIDS_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout,
            ),
            acquire_timeout: env_secs(
                "CINEGIDS_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout,
            ),
            max_retries: env_parse("CINEGIDS_MAX_RETRIES", defaults.max_retries),
            retry_backoff_base: env_secs(
                "CINEGIDS_RETRY_BACKOFF_SECS",
                defaults.retry_backoff_base,
            ),

            poms_rate: defaults.poms_rate,
            tmdb_rate: defaults.tmdb_rate,
            search_rate: defaults.search_rate,
            vpro_rate: defaults.vpro_rate,

            poms_base: env_string("CINEGIDS_POMS_BASE", defaults.poms_base),
            poms_origin: env_string(
                "CINEGIDS_POMS_ORIGIN",
                defaults.poms_origin,
            ),
            poms_profile: env_string(
                "CINEGIDS_POMS_PROFILE",
                defaults.poms_profile,
            ),
            credential_page: env_string(
                "CINEGIDS_CREDENTIAL_PAGE",
                defaults.credential_page,
            ),
            credential_refresh_cooldown: env_secs(
                "CINEGIDS_CREDENTIAL_COOLDOWN_SECS",
                defaults.credential_refresh_cooldown,
            ),

            tmdb_base: env_string("CINEGIDS_TMDB_BASE", defaults.tmdb_base),
            tmdb_api_key: env::var("TMDB_API_KEY").ok().filter(|k| !k.is_empty()),

            title_similarity_threshold: env_parse(
                "CINEGIDS_SIMILARITY_THRESHOLD",
                defaults.title_similarity_threshold,
            ),
            year_tolerance: env_parse(
                "CINEGIDS_YEAR_TOLERANCE",
                defaults.year_tolerance,
            ),
            max_alternate_titles: env_parse(
                "CINEGIDS_MAX_ALTERNATE_TITLES",
                defaults.max_alternate_titles,
            ),
        }
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.cache_dir)?;
        if let Some(parent) = self.credentials_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

fn env_string(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    match env::var(key).ok().and_then(|v| v.parse::<u64>().ok()) {
        Some(secs) => Duration::from_secs(secs),
        None => default,
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| {
            if env::var(key).is_ok() {
                tracing::warn!(key, "unparseable value, using default");
            }
            default
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert!(s.title_similarity_threshold > 0.5);
        assert!(s.not_found_ttl < s.found_ttl);
        assert_eq!(s.year_tolerance, 2);
        assert!(s.search_rate.per_second < s.poms_rate.per_second);
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        // SAFETY: test runs single-threaded with respect to this variable.
        unsafe { env::set_var("CINEGIDS_TEST_PARSE", "not-a-number") };
        let value: u32 = env_parse("CINEGIDS_TEST_PARSE", 7);
        assert_eq!(value, 7);
        unsafe { env::remove_var("CINEGIDS_TEST_PARSE") };
    }
}
