use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::media_type::MediaType;

const MAX_SLUG_LEN: usize = 50;

/// Input to a resolution run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupQuery {
    pub title: String,
    pub year: Option<i32>,
    pub imdb_id: Option<String>,
    pub media_type: MediaType,
}

impl LookupQuery {
    pub fn film(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            year: None,
            imdb_id: None,
            media_type: MediaType::Film,
        }
    }

    /// Deterministic cache key: `vpro-{slug}-{year|0}-{imdb|none}-{m|s}`.
    ///
    /// The slug is lowercase alphanumerics joined by single hyphens. A slug
    /// over 50 characters is truncated and suffixed with 8 hex characters of
    /// its SHA-256 so distinct long titles keep distinct keys.
    pub fn cache_key(&self) -> String {
        let slug = slugify(&self.title);
        let year = self.year.unwrap_or(0);
        let imdb = self.imdb_id.as_deref().unwrap_or("none");
        format!(
            "vpro-{slug}-{year}-{imdb}-{ch}",
            ch = self.media_type.type_char()
        )
    }
}

fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_hyphen = true;
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("untitled");
    }
    if slug.len() > MAX_SLUG_LEN {
        let digest = Sha256::digest(slug.as_bytes());
        let mut cut = MAX_SLUG_LEN;
        while !slug.is_char_boundary(cut) {
            cut -= 1;
        }
        slug.truncate(cut);
        while slug.ends_with('-') {
            slug.pop();
        }
        slug.push('-');
        for byte in &digest[..4] {
            slug.push_str(&format!("{byte:02x}"));
        }
    }
    slug
}
