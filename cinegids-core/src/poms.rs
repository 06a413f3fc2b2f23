//! Client for the NPO POMS pages API, the primary metadata source.
//!
//! Requests carry an HMAC-SHA256 signature over the origin, the request
//! date, the API path, and the sorted query parameters. A 401/403 surfaces
//! as [`LookupError::AuthRejected`] so the caller can refresh credentials
//! and retry exactly once.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ORIGIN};
use sha2::Sha256;
use url::Url;

use cinegids_config::Settings;
use cinegids_model::{Candidate, Credentials, MediaType};

use crate::credentials::CredentialManager;
use crate::error::{LookupError, Result};
use crate::http::RateLimitedClient;
use crate::text;

type HmacSha256 = Hmac<Sha256>;

const SEARCH_MAX_RESULTS: u32 = 10;
// Compatibility parameter some upstream clients send; excluded from signing.
const UNSIGNED_PARAMS: &[&str] = &["iecomp"];

pub struct PomsClient {
    http: Arc<RateLimitedClient>,
    credentials: Arc<CredentialManager>,
    base: String,
    origin: String,
    profile: String,
    similarity_threshold: f64,
    year_tolerance: i32,
}

impl PomsClient {
    pub fn new(
        settings: &Settings,
        http: Arc<RateLimitedClient>,
        credentials: Arc<CredentialManager>,
    ) -> Self {
        Self {
            http,
            credentials,
            base: settings.poms_base.trim_end_matches('/').to_string(),
            origin: settings.poms_origin.clone(),
            profile: settings.poms_profile.clone(),
            similarity_threshold: settings.title_similarity_threshold,
            year_tolerance: settings.year_tolerance,
        }
    }

    /// Search the pages index and apply the acceptance policy.
    ///
    /// `imdb_known` disables the fuzzy acceptance tier: with an IMDb id in
    /// hand, alternate-title resolution is more reliable than a fuzzy hit.
    pub async fn search(
        &self,
        title: &str,
        year: Option<i32>,
        media_type: MediaType,
        imdb_known: bool,
    ) -> Result<Option<Candidate>> {
        let params = [
            ("max".to_string(), SEARCH_MAX_RESULTS.to_string()),
            ("profile".to_string(), self.profile.clone()),
        ];
        let mut url = Url::parse(&format!("{}/pages/", self.base))
            .map_err(|e| LookupError::Internal(format!("poms url: {e}")))?;
        for (k, v) in &params {
            url.query_pairs_mut().append_pair(k, v);
        }

        let creds = self.credentials.current();
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let signature = sign_request(&creds, &self.origin, &date, "/v1/api/pages/", &params);

        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, header_value(&self.origin)?);
        headers.insert(
            HeaderName::from_static("x-npo-date"),
            header_value(&date)?,
        );
        headers.insert(
            reqwest::header::AUTHORIZATION,
            header_value(&format!("NPO {}:{}", creds.key, signature))?,
        );

        let body = serde_json::json!({
            "highlight": true,
            "searches": { "text": title },
            "facets": { "types": { "include": "MOVIE" } },
        });

        let response = self.http.post_json(&url, headers, &body).await?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(LookupError::AuthRejected {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "poms search failed");
            return Ok(None);
        }

        let payload: serde_json::Value = response.json().await?;
        let candidates = parse_candidates(&payload, media_type);
        tracing::debug!(
            title,
            count = candidates.len(),
            "poms returned candidates"
        );
        Ok(choose_candidate(
            title,
            year,
            imdb_known,
            candidates,
            self.similarity_threshold,
            self.year_tolerance,
        ))
    }
}

impl std::fmt::Debug for PomsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PomsClient")
            .field("base", &self.base)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| LookupError::Internal(format!("header value: {e}")))
}

/// Base64 HMAC-SHA256 over the canonical request description.
///
/// The message is `origin:{o},x-npo-date:{d},uri:{path}` followed by each
/// signed query parameter as `,{k}:{v}` in key order.
fn sign_request(
    creds: &Credentials,
    origin: &str,
    date: &str,
    uri: &str,
    params: &[(String, String)],
) -> String {
    let mut message = format!("origin:{origin},x-npo-date:{date},uri:{uri}");
    let mut signed: Vec<&(String, String)> = params
        .iter()
        .filter(|(k, _)| !UNSIGNED_PARAMS.contains(&k.as_str()))
        .collect();
    signed.sort_by(|a, b| a.0.cmp(&b.0));
    for (k, v) in signed {
        message.push_str(&format!(",{k}:{v}"));
    }

    // Key length is unconstrained for HMAC, so this cannot fail.
    let mut mac = HmacSha256::new_from_slice(creds.secret.as_bytes())
        .unwrap_or_else(|_| HmacSha256::new_from_slice(b"").unwrap());
    mac.update(message.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

fn parse_candidates(
    payload: &serde_json::Value,
    media_type: MediaType,
) -> Vec<Candidate> {
    let Some(items) = payload.get("items").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            // Search hits wrap the page object in a "result" field.
            let page = item.get("result").unwrap_or(item);
            parse_page(page, media_type)
        })
        .collect()
}

fn parse_page(
    page: &serde_json::Value,
    media_type: MediaType,
) -> Option<Candidate> {
    let title = page.get("title")?.as_str()?.trim().to_string();
    if title.is_empty() {
        return None;
    }
    let mut candidate = Candidate::new(title, media_type);

    if let Some(url) = page.get("url").and_then(|v| v.as_str()) {
        candidate.source_url = Some(url.to_string());
        candidate.vpro_id = text::extract_vpro_id(url);
    }

    if let Some(relations) = page.get("relations").and_then(|v| v.as_array()) {
        for relation in relations {
            let Some(kind) = relation.get("type").and_then(|v| v.as_str())
            else {
                continue;
            };
            let Some(value) = relation_value(relation) else {
                continue;
            };
            match kind {
                "CINEMA_YEAR" => {
                    candidate.year = value.parse().ok().filter(|y| {
                        (1888..=2100).contains(y)
                    });
                }
                "CINEMA_DIRECTOR" => candidate.director = Some(value),
                "CINEMA_APPRECIATION" => {
                    // Appreciation arrives as an integer 0..=100.
                    candidate.appreciation = value
                        .parse::<f32>()
                        .ok()
                        .map(|v| v / 10.0)
                        .filter(|v| (0.0..=10.0).contains(v));
                }
                "CINEMA_AGERATING" => {
                    candidate.content_rating = Some(value);
                }
                _ => {}
            }
        }
    }

    if let Some(genres) = page.get("genres").and_then(|v| v.as_array()) {
        for genre in genres {
            if let Some(terms) = genre.get("terms").and_then(|v| v.as_array())
            {
                candidate.genres.extend(
                    terms
                        .iter()
                        .filter_map(|t| t.as_str())
                        .map(|t| t.to_string()),
                );
            } else if let Some(name) = genre.as_str() {
                candidate.genres.push(name.to_string());
            }
        }
    }

    let raw_description = page
        .get("paragraphs")
        .and_then(|v| v.as_array())
        .and_then(|paragraphs| paragraphs.first())
        .and_then(|p| p.get("body"))
        .and_then(|v| v.as_str())
        .or_else(|| page.get("summary").and_then(|v| v.as_str()));
    if let Some(raw) = raw_description {
        let clean = text::sanitize_description(raw);
        if text::is_valid_description(&clean) {
            candidate.description = Some(clean);
        }
    }

    if candidate.year.is_none()
        && let Some(url) = candidate.source_url.as_deref()
    {
        candidate.year = text::extract_year(url);
    }

    Some(candidate)
}

/// Relation values sometimes lead with an underscore in the feed.
fn relation_value(relation: &serde_json::Value) -> Option<String> {
    let raw = relation
        .get("values")
        .and_then(|v| v.as_array())
        .and_then(|values| values.first())
        .and_then(|v| v.as_str())
        .or_else(|| relation.get("value").and_then(|v| v.as_str()))?;
    let trimmed = raw.trim_start_matches('_').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Acceptance policy, applied in one place.
///
/// Tier 1: exact normalized title and exact year. Tier 2: exact normalized
/// title with the year inside the tolerance window. Tier 3: the most
/// similar candidate, when its similarity strictly exceeds the threshold
/// and the year is compatible; skipped entirely when the caller already
/// holds an IMDb id.
fn choose_candidate(
    query_title: &str,
    query_year: Option<i32>,
    imdb_known: bool,
    candidates: Vec<Candidate>,
    threshold: f64,
    tolerance: i32,
) -> Option<Candidate> {
    if let Some(target) = query_year {
        for candidate in &candidates {
            if text::titles_match(query_title, &candidate.title)
                && candidate.year == Some(target)
            {
                return Some(candidate.clone());
            }
        }
    }

    for candidate in &candidates {
        if text::titles_match(query_title, &candidate.title)
            && text::years_compatible(candidate.year, query_year, tolerance)
        {
            return Some(candidate.clone());
        }
    }

    if !imdb_known {
        let best = candidates
            .iter()
            .filter(|c| {
                text::years_compatible(c.year, query_year, tolerance)
            })
            .map(|c| (text::title_similarity(query_title, &c.title), c))
            .max_by(|(a, _), (b, _)| a.total_cmp(b));
        if let Some((score, best)) = best
            && score > threshold
        {
            tracing::debug!(
                query = query_title,
                result = %best.title,
                score,
                "fuzzy candidate accepted"
            );
            return Some(best.clone());
        }
    }

    for candidate in &candidates {
        let reason = if !text::titles_match(query_title, &candidate.title) {
            "title mismatch"
        } else {
            "year outside tolerance"
        };
        tracing::debug!(
            query = query_title,
            result = %candidate.title,
            result_year = ?candidate.year,
            reason,
            "candidate rejected"
        );
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(title: &str, year: Option<i32>) -> Candidate {
        let mut c = Candidate::new(title.to_string(), MediaType::Film);
        c.year = year;
        c
    }

    #[test]
    fn signature_is_stable_and_sorted() {
        let creds = Credentials::scraped(
            "key".to_string(),
            "secret".to_string(),
            "test".to_string(),
        );
        let params = [
            ("profile".to_string(), "vprocinema".to_string()),
            ("max".to_string(), "10".to_string()),
            ("iecomp".to_string(), "true".to_string()),
        ];
        let a = sign_request(
            &creds,
            "https://www.vprogids.nl",
            "Sat, 30 Aug 2025 12:00:00 GMT",
            "/v1/api/pages/",
            &params,
        );
        // Same params in a different order, without the unsigned one.
        let reordered = [
            ("max".to_string(), "10".to_string()),
            ("profile".to_string(), "vprocinema".to_string()),
        ];
        let b = sign_request(
            &creds,
            "https://www.vprogids.nl",
            "Sat, 30 Aug 2025 12:00:00 GMT",
            "/v1/api/pages/",
            &reordered,
        );
        assert_eq!(a, b);
        // A different secret must change the signature.
        let other = Credentials::scraped(
            "key".to_string(),
            "other".to_string(),
            "test".to_string(),
        );
        let c = sign_request(
            &other,
            "https://www.vprogids.nl",
            "Sat, 30 Aug 2025 12:00:00 GMT",
            "/v1/api/pages/",
            &params,
        );
        assert_ne!(a, c);
    }

    #[test]
    fn exact_title_and_year_wins_over_order() {
        let candidates = vec![
            cand("Der Untergang II", Some(2010)),
            cand("Der Untergang", Some(2004)),
        ];
        let chosen = choose_candidate(
            "Der Untergang",
            Some(2004),
            false,
            candidates,
            0.7,
            2,
        )
        .unwrap();
        assert_eq!(chosen.year, Some(2004));
    }

    #[test]
    fn title_match_tolerates_year_skew() {
        let candidates = vec![cand("Turks Fruit", Some(1974))];
        let chosen =
            choose_candidate("Turks Fruit", Some(1973), false, candidates, 0.7, 2);
        assert!(chosen.is_some());
    }

    #[test]
    fn fuzzy_tier_rejects_sequels() {
        let candidates = vec![cand("The Matrix Reloaded", Some(2003))];
        let chosen =
            choose_candidate("The Matrix", Some(2003), false, candidates, 0.7, 2);
        assert!(chosen.is_none());
    }

    #[test]
    fn fuzzy_tier_picks_the_most_similar_candidate() {
        // No exact title present; the higher-similarity candidate must win
        // over result order.
        let candidates = vec![
            cand("Soldaat van Oranje deel twee", Some(1977)),
            cand("De Soldaat van Oranje", Some(1977)),
        ];
        let chosen = choose_candidate(
            "Soldaat van Oranje",
            Some(1977),
            false,
            candidates,
            0.7,
            2,
        )
        .unwrap();
        assert_eq!(chosen.title, "De Soldaat van Oranje");
    }

    #[test]
    fn fuzzy_tier_disabled_with_imdb_id() {
        // Near-identical title, would pass fuzzily, but an IMDb id is held.
        let candidates = vec![cand("De Tweeling Film", Some(2002))];
        let with_id =
            choose_candidate("De Tweeling", Some(2002), true, candidates.clone(), 0.5, 2);
        assert!(with_id.is_none());
        let without_id =
            choose_candidate("De Tweeling", Some(2002), false, candidates, 0.5, 2);
        assert!(without_id.is_some());
    }

    #[test]
    fn year_mismatch_rejects_exact_title() {
        let candidates = vec![cand("Nosferatu", Some(1922))];
        let chosen =
            choose_candidate("Nosferatu", Some(2024), false, candidates, 0.7, 2);
        assert!(chosen.is_none());
    }

    #[test]
    fn parses_page_payload() {
        let payload = serde_json::json!({
            "items": [{
                "result": {
                    "title": "Der Untergang",
                    "url": "https://www.vprogids.nl/cinema/films/film~26120~der-untergang~.html",
                    "relations": [
                        { "type": "CINEMA_YEAR", "values": ["_2004"] },
                        { "type": "CINEMA_DIRECTOR", "values": ["Oliver Hirschbiegel"] },
                        { "type": "CINEMA_APPRECIATION", "values": ["78"] },
                        { "type": "CINEMA_AGERATING", "values": ["16"] }
                    ],
                    "genres": [ { "terms": ["Drama", "Oorlog"] } ],
                    "paragraphs": [{
                        "body": "Indringend drama over de laatste dagen in de bunker, \
                                 gezien door de ogen van Hitlers secretaresse."
                    }]
                }
            }]
        });
        let candidates = parse_candidates(&payload, MediaType::Film);
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.year, Some(2004));
        assert_eq!(c.vpro_id.as_deref(), Some("26120"));
        assert_eq!(c.director.as_deref(), Some("Oliver Hirschbiegel"));
        assert_eq!(c.appreciation, Some(7.8));
        assert_eq!(c.content_rating.as_deref(), Some("16"));
        assert_eq!(c.genres, vec!["Drama", "Oorlog"]);
        assert!(c.description.is_some());
    }

    #[test]
    fn short_description_is_dropped_not_fatal() {
        let payload = serde_json::json!({
            "items": [{
                "title": "Korte Film",
                "paragraphs": [{ "body": "Te kort." }]
            }]
        });
        let candidates = parse_candidates(&payload, MediaType::Film);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].description.is_none());
    }
}
