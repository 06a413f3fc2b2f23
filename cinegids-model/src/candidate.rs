use serde::{Deserialize, Serialize};

use crate::media_type::MediaType;
use crate::record::{CacheRecord, CacheStatus, LookupMethod};

/// A possible match returned by one of the search backends.
///
/// Candidates are ephemeral; only an accepted candidate is promoted to a
/// [`CacheRecord`] and persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    pub year: Option<i32>,
    pub description: Option<String>,
    pub source_url: Option<String>,
    pub imdb_id: Option<String>,
    pub vpro_id: Option<String>,
    pub director: Option<String>,
    pub genres: Vec<String>,
    pub appreciation: Option<f32>,
    pub content_rating: Option<String>,
    pub media_type: MediaType,
}

impl Candidate {
    pub fn new(title: String, media_type: MediaType) -> Self {
        Self {
            title,
            year: None,
            description: None,
            source_url: None,
            imdb_id: None,
            vpro_id: None,
            director: None,
            genres: Vec::new(),
            appreciation: None,
            content_rating: None,
            media_type,
        }
    }

    /// Promote an accepted candidate into a persistable record.
    pub fn into_record(
        self,
        lookup_key: String,
        method: LookupMethod,
        discovered_imdb: Option<String>,
    ) -> CacheRecord {
        let now = chrono::Utc::now();
        CacheRecord {
            lookup_key,
            title: self.title,
            year: self.year,
            description: self.description,
            source_url: self.source_url,
            imdb_id: self.imdb_id,
            vpro_id: self.vpro_id,
            director: self.director,
            genres: self.genres,
            appreciation: self.appreciation,
            content_rating: self.content_rating,
            media_type: self.media_type,
            status: CacheStatus::Found,
            lookup_method: Some(method),
            discovered_imdb,
            fetched_at: now,
            last_accessed: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_marks_record_found() {
        let mut cand = Candidate::new("Turks Fruit".to_string(), MediaType::Film);
        cand.year = Some(1973);
        cand.description = Some("Paul Verhoeven's breakthrough.".to_string());
        let rec = cand.into_record(
            "vpro-turks-fruit-1973-none-m".to_string(),
            LookupMethod::Poms,
            None,
        );
        assert_eq!(rec.status, CacheStatus::Found);
        assert_eq!(rec.lookup_method, Some(LookupMethod::Poms));
        assert_eq!(rec.year, Some(1973));
    }
}
