//! Core data model definitions shared across cinegids crates.
#![allow(missing_docs)]

pub mod candidate;
pub mod credentials;
pub mod media_type;
pub mod query;
pub mod record;

// Intentionally curated re-exports for downstream consumers.
pub use candidate::Candidate;
pub use credentials::Credentials;
pub use media_type::MediaType;
pub use query::LookupQuery;
pub use record::{CacheRecord, CacheStatus, LookupMethod};
