use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::media_type::MediaType;

/// Outcome class of a completed lookup.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Found,
    NotFound,
}

/// Which stage of the pipeline produced the result.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LookupMethod {
    Poms,
    TmdbAlternate,
    Web,
}

impl std::fmt::Display for LookupMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupMethod::Poms => write!(f, "poms"),
            LookupMethod::TmdbAlternate => write!(f, "tmdb_alt"),
            LookupMethod::Web => write!(f, "web"),
        }
    }
}

/// Persisted result of a lookup, successful or not.
///
/// A `NotFound` record carries no description; the constructors keep that
/// invariant so readers never need to re-check it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub lookup_key: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub imdb_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vpro_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub director: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub genres: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub appreciation: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content_rating: Option<String>,
    pub media_type: MediaType,
    pub status: CacheStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lookup_method: Option<LookupMethod>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub discovered_imdb: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl CacheRecord {
    /// Negative-result record. Description is intentionally absent.
    pub fn not_found(
        lookup_key: String,
        title: String,
        year: Option<i32>,
        media_type: MediaType,
    ) -> Self {
        let now = Utc::now();
        Self {
            lookup_key,
            title,
            year,
            description: None,
            source_url: None,
            imdb_id: None,
            vpro_id: None,
            director: None,
            genres: Vec::new(),
            appreciation: None,
            content_rating: None,
            media_type,
            status: CacheStatus::NotFound,
            lookup_method: None,
            discovered_imdb: None,
            fetched_at: now,
            last_accessed: now,
        }
    }

    /// True when the record has outlived the TTL for its status.
    pub fn is_expired(
        &self,
        found_ttl: Duration,
        not_found_ttl: Duration,
    ) -> bool {
        let ttl = match self.status {
            CacheStatus::Found => found_ttl,
            CacheStatus::NotFound => not_found_ttl,
        };
        Utc::now() - self.fetched_at > ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_carries_no_description() {
        let rec = CacheRecord::not_found(
            "vpro-x-0-none-m".to_string(),
            "X".to_string(),
            None,
            MediaType::Film,
        );
        assert_eq!(rec.status, CacheStatus::NotFound);
        assert!(rec.description.is_none());
    }

    #[test]
    fn expiry_depends_on_status() {
        let mut rec = CacheRecord::not_found(
            "k".to_string(),
            "X".to_string(),
            None,
            MediaType::Film,
        );
        rec.fetched_at = Utc::now() - Duration::days(10);
        // Ten days old: past the not-found window, inside the found one.
        assert!(rec.is_expired(Duration::days(30), Duration::days(7)));
        rec.status = CacheStatus::Found;
        assert!(!rec.is_expired(Duration::days(30), Duration::days(7)));
    }

    #[test]
    fn round_trips_through_json() {
        let rec = CacheRecord::not_found(
            "vpro-downfall-2004-none-m".to_string(),
            "Downfall".to_string(),
            Some(2004),
            MediaType::Film,
        );
        let json = serde_json::to_string(&rec).unwrap();
        let back: CacheRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }
}
