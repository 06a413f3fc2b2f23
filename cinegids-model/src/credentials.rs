use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// API key pair for the POMS search endpoint.
///
/// Instances are immutable; a refresh produces a new value that replaces
/// the old one wholesale. `fetched_at` and `source` exist for diagnostics
/// only and never participate in request signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
    pub fetched_at: DateTime<Utc>,
    pub source: String,
}

impl Credentials {
    /// Compiled-in fallback pair, used until a scrape succeeds.
    pub fn builtin() -> Self {
        Self {
            key: "ione7ahfij".to_string(),
            secret: "aag9veesei".to_string(),
            fetched_at: Utc::now(),
            source: "builtin".to_string(),
        }
    }

    /// Freshly scraped pair.
    pub fn scraped(key: String, secret: String, source: String) -> Self {
        Self {
            key,
            secret,
            fetched_at: Utc::now(),
            source,
        }
    }

    /// Both tokens present and non-empty.
    pub fn is_usable(&self) -> bool {
        !self.key.is_empty() && !self.secret.is_empty()
    }
}
