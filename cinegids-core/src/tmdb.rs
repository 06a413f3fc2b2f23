//! TMDB client used only to widen the title search space.
//!
//! TMDB never decides a match. It turns an IMDb id (or a plain title) into
//! a prioritized list of alternate titles that are replayed against the
//! primary source, and it can discover an IMDb id along the way.

use std::sync::Arc;

use serde::Deserialize;
use url::Url;

use cinegids_config::Settings;

use crate::error::{LookupError, Result};
use crate::http::RateLimitedClient;

/// Release countries whose titles tend to match the Dutch catalogue.
const PRIORITY_COUNTRIES: &[&str] = &["FR", "NL", "BE", "DE"];

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    movie_results: Vec<MovieResult>,
}

#[derive(Debug, Deserialize)]
struct MovieResult {
    id: u64,
    #[serde(default)]
    original_title: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<MovieResult>,
}

#[derive(Debug, Deserialize)]
struct AlternativeTitlesResponse {
    #[serde(default)]
    titles: Vec<AlternativeTitle>,
}

#[derive(Debug, Deserialize)]
struct AlternativeTitle {
    #[serde(default)]
    iso_3166_1: String,
    title: String,
}

#[derive(Debug, Deserialize)]
struct ExternalIdsResponse {
    #[serde(default)]
    imdb_id: Option<String>,
}

#[derive(Debug)]
pub struct TmdbClient {
    http: Arc<RateLimitedClient>,
    base: String,
    api_key: Option<String>,
}

impl TmdbClient {
    pub fn new(settings: &Settings, http: Arc<RateLimitedClient>) -> Self {
        if settings.tmdb_api_key.is_none() {
            tracing::debug!("no TMDB api key configured, alternate titles disabled");
        }
        Self {
            http,
            base: settings.tmdb_base.trim_end_matches('/').to_string(),
            api_key: settings.tmdb_api_key.clone(),
        }
    }

    /// Alternate titles for a known IMDb id, best first.
    pub async fn titles_for_imdb(&self, imdb_id: &str) -> Result<Vec<String>> {
        let Some(movie) = self.find_by_imdb(imdb_id).await? else {
            return Ok(Vec::new());
        };
        let alternates = self.alternative_titles(movie.id).await?;
        Ok(prioritize_titles(
            movie.original_title.or(movie.title),
            alternates,
        ))
    }

    /// Title-based discovery: returns the IMDb id (when TMDB knows it) and
    /// the prioritized alternate titles of the best search hit.
    pub async fn titles_for_query(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<(Option<String>, Vec<String>)> {
        let Some(movie) = self.search_movie(title, year).await? else {
            return Ok((None, Vec::new()));
        };
        let imdb_id = self.external_imdb_id(movie.id).await?;
        let alternates = self.alternative_titles(movie.id).await?;
        let titles = prioritize_titles(
            movie.original_title.or(movie.title),
            alternates,
        );
        Ok((imdb_id, titles))
    }

    async fn find_by_imdb(&self, imdb_id: &str) -> Result<Option<MovieResult>> {
        let Some(mut url) = self.endpoint(&format!("find/{imdb_id}"))? else {
            return Ok(None);
        };
        url.query_pairs_mut()
            .append_pair("external_source", "imdb_id");
        let response = self.http.get(&url).await?;
        if !response.status().is_success() {
            tracing::warn!(
                status = response.status().as_u16(),
                imdb_id,
                "tmdb find failed"
            );
            return Ok(None);
        }
        let found: FindResponse = response.json().await?;
        Ok(found.movie_results.into_iter().next())
    }

    /// Best search hit: a result whose release year matches exactly wins,
    /// otherwise the first result stands.
    async fn search_movie(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<Option<MovieResult>> {
        let Some(mut url) = self.endpoint("search/movie")? else {
            return Ok(None);
        };
        url.query_pairs_mut().append_pair("query", title);
        if let Some(year) = year {
            url.query_pairs_mut()
                .append_pair("year", &year.to_string());
        }
        let response = self.http.get(&url).await?;
        if !response.status().is_success() {
            tracing::warn!(
                status = response.status().as_u16(),
                title,
                "tmdb search failed"
            );
            return Ok(None);
        }
        let search: SearchResponse = response.json().await?;
        Ok(pick_search_result(search.results, year))
    }

    async fn alternative_titles(
        &self,
        movie_id: u64,
    ) -> Result<Vec<(String, String)>> {
        let Some(url) =
            self.endpoint(&format!("movie/{movie_id}/alternative_titles"))?
        else {
            return Ok(Vec::new());
        };
        let response = self.http.get(&url).await?;
        if !response.status().is_success() {
            return Ok(Vec::new());
        }
        let alternates: AlternativeTitlesResponse = response.json().await?;
        Ok(alternates
            .titles
            .into_iter()
            .map(|t| (t.iso_3166_1, t.title))
            .collect())
    }

    async fn external_imdb_id(&self, movie_id: u64) -> Result<Option<String>> {
        let Some(url) =
            self.endpoint(&format!("movie/{movie_id}/external_ids"))?
        else {
            return Ok(None);
        };
        let response = self.http.get(&url).await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let ids: ExternalIdsResponse = response.json().await?;
        Ok(ids.imdb_id.filter(|id| !id.is_empty()))
    }

    /// `None` when no API key is configured.
    fn endpoint(&self, path: &str) -> Result<Option<Url>> {
        let Some(key) = self.api_key.as_deref() else {
            return Ok(None);
        };
        let mut url = Url::parse(&format!("{}/{path}", self.base))
            .map_err(|e| LookupError::Internal(format!("tmdb url: {e}")))?;
        url.query_pairs_mut().append_pair("api_key", key);
        Ok(Some(url))
    }
}

fn pick_search_result(
    results: Vec<MovieResult>,
    year: Option<i32>,
) -> Option<MovieResult> {
    if let Some(target) = year {
        let exact = results.iter().position(|r| {
            r.release_date
                .as_deref()
                .and_then(|d| d.get(..4))
                .and_then(|y| y.parse::<i32>().ok())
                == Some(target)
        });
        if let Some(index) = exact {
            let mut results = results;
            return Some(results.swap_remove(index));
        }
    }
    results.into_iter().next()
}

/// Order titles by usefulness for the Dutch catalogue and drop
/// case-insensitive duplicates.
fn prioritize_titles(
    original: Option<String>,
    alternates: Vec<(String, String)>,
) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::new();
    if let Some(original) = original {
        ordered.push(original);
    }
    for country in PRIORITY_COUNTRIES {
        for (iso, title) in &alternates {
            if iso == country {
                ordered.push(title.clone());
            }
        }
    }
    for (iso, title) in &alternates {
        if !PRIORITY_COUNTRIES.contains(&iso.as_str()) {
            ordered.push(title.clone());
        }
    }

    let mut seen = std::collections::HashSet::new();
    ordered
        .into_iter()
        .filter(|title| {
            let folded = title.to_lowercase();
            !title.trim().is_empty() && seen.insert(folded)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alt(country: &str, title: &str) -> (String, String) {
        (country.to_string(), title.to_string())
    }

    #[test]
    fn original_title_leads_then_priority_countries() {
        let titles = prioritize_titles(
            Some("Der Untergang".to_string()),
            vec![
                alt("US", "Downfall"),
                alt("NL", "De Ondergang"),
                alt("FR", "La Chute"),
            ],
        );
        assert_eq!(
            titles,
            vec!["Der Untergang", "La Chute", "De Ondergang", "Downfall"]
        );
    }

    #[test]
    fn duplicates_collapse_case_insensitively() {
        let titles = prioritize_titles(
            Some("Downfall".to_string()),
            vec![alt("US", "DOWNFALL"), alt("GB", "Downfall")],
        );
        assert_eq!(titles, vec!["Downfall"]);
    }

    #[test]
    fn exact_year_beats_result_order() {
        let results = vec![
            MovieResult {
                id: 1,
                original_title: Some("Nosferatu".to_string()),
                title: None,
                release_date: Some("2024-12-25".to_string()),
            },
            MovieResult {
                id: 2,
                original_title: Some("Nosferatu".to_string()),
                title: None,
                release_date: Some("1922-03-04".to_string()),
            },
        ];
        let picked = pick_search_result(results, Some(1922)).unwrap();
        assert_eq!(picked.id, 2);
    }

    #[test]
    fn missing_year_takes_first_result() {
        let results = vec![
            MovieResult {
                id: 7,
                original_title: None,
                title: Some("First".to_string()),
                release_date: None,
            },
            MovieResult {
                id: 8,
                original_title: None,
                title: Some("Second".to_string()),
                release_date: None,
            },
        ];
        assert_eq!(pick_search_result(results, None).unwrap().id, 7);
    }
}
