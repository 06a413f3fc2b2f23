//! Title normalization, similarity scoring, and field extraction.
//!
//! Matching never compares raw strings; everything funnels through
//! [`normalize_for_match`] so diacritics, case, punctuation, and whitespace
//! differences cannot split otherwise identical titles.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

static PAREN_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((\d{4})\)").unwrap());
static BARE_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap());
static IMDB_BRACED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{imdb-(tt\d{7,10})\}").unwrap());
static IMDB_BRACKETED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(tt\d{7,10})\]").unwrap());
static IMDB_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(tt\d{7,10})\b").unwrap());
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static VPRO_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:film|serie)~(\d+)~").unwrap());

const YEAR_MIN: i32 = 1888;
const YEAR_MAX: i32 = 2100;

const MIN_DESCRIPTION_CHARS: usize = 50;
const MIN_DESCRIPTION_WORDS: usize = 10;

/// Boilerplate fragments that mark a scraped "description" as a login wall,
/// cookie banner, or error page rather than editorial text.
const DESCRIPTION_REJECT_PHRASES: &[&str] = &[
    "log in",
    "inloggen",
    "cookies accepteren",
    "accepteer cookies",
    "pagina niet gevonden",
    "page not found",
    "javascript uitschakelen",
    "enable javascript",
    "403 forbidden",
    "404 not found",
    "toegang geweigerd",
    "access denied",
    "abonneer",
    "subscribe to continue",
];

/// NFKC-fold text and flatten typographic dashes and quotes.
pub fn normalize_unicode(input: &str) -> String {
    input
        .nfkc()
        .map(|ch| match ch {
            '\u{2010}'..='\u{2015}' | '\u{2212}' => '-',
            '\u{2018}' | '\u{2019}' | '\u{201A}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201E}' => '"',
            other => other,
        })
        .collect()
}

/// Canonical comparison form: lowercase, accents stripped, punctuation
/// dropped, whitespace collapsed.
pub fn normalize_for_match(input: &str) -> String {
    let folded: String = normalize_unicode(input)
        .to_lowercase()
        .nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .map(|ch| if ch.is_alphanumeric() { ch } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Equality under [`normalize_for_match`].
pub fn titles_match(a: &str, b: &str) -> bool {
    let na = normalize_for_match(a);
    !na.is_empty() && na == normalize_for_match(b)
}

/// Jaccard similarity over normalized word sets, in `[0.0, 1.0]`.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;

    let na = normalize_for_match(a);
    let nb = normalize_for_match(b);
    let wa: HashSet<&str> = na.split_whitespace().collect();
    let wb: HashSet<&str> = nb.split_whitespace().collect();
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let intersection = wa.intersection(&wb).count() as f64;
    let union = wa.union(&wb).count() as f64;
    intersection / union
}

/// Years agree within `tolerance`. A missing year on either side never
/// disqualifies a candidate on its own.
pub fn years_compatible(a: Option<i32>, b: Option<i32>, tolerance: i32) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => (a - b).abs() <= tolerance,
        _ => true,
    }
}

/// Pull a release year out of free text.
///
/// A parenthesized year wins over any bare four-digit run, so
/// `"2001: A Space Odyssey (1968)"` yields 1968 rather than 2001.
pub fn extract_year(text: &str) -> Option<i32> {
    for caps in PAREN_YEAR.captures_iter(text) {
        if let Ok(year) = caps[1].parse::<i32>()
            && (YEAR_MIN..=YEAR_MAX).contains(&year)
        {
            return Some(year);
        }
    }
    BARE_YEAR
        .captures(text)
        .and_then(|caps| caps[1].parse().ok())
}

/// Pull an IMDb id out of free text, preferring explicitly tagged forms
/// (`{imdb-tt...}`, `[tt...]`) over a bare id.
pub fn extract_imdb_id(text: &str) -> Option<String> {
    for pattern in [&IMDB_BRACED, &IMDB_BRACKETED, &IMDB_BARE] {
        if let Some(caps) = pattern.captures(text) {
            return Some(caps[1].to_string());
        }
    }
    None
}

/// Numeric id embedded in VPRO film and series page URLs.
pub fn extract_vpro_id(url: &str) -> Option<String> {
    VPRO_ID.captures(url).map(|caps| caps[1].to_string())
}

pub fn is_valid_imdb_id(id: &str) -> bool {
    IMDB_BARE.captures(id).is_some_and(|c| c[0].len() == id.len())
}

/// Strip markup and control characters from scraped description text while
/// keeping paragraph breaks.
pub fn sanitize_description(raw: &str) -> String {
    let decoded = raw
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    let stripped = HTML_TAG.replace_all(&decoded, " ");
    let mut paragraphs: Vec<String> = Vec::new();
    for block in stripped.split("\n\n") {
        let clean: String = block
            .chars()
            .filter(|ch| !ch.is_control() || *ch == '\n')
            .collect();
        let flat = clean.split_whitespace().collect::<Vec<_>>().join(" ");
        if !flat.is_empty() {
            paragraphs.push(flat);
        }
    }
    paragraphs.join("\n\n")
}

/// Heuristic filter for scraped descriptions. Short fragments and pages
/// serving login/error boilerplate are rejected.
pub fn is_valid_description(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.len() < MIN_DESCRIPTION_CHARS {
        return false;
    }
    if trimmed.split_whitespace().count() < MIN_DESCRIPTION_WORDS {
        return false;
    }
    let lower = trimmed.to_lowercase();
    !DESCRIPTION_REJECT_PHRASES
        .iter()
        .any(|phrase| lower.contains(phrase))
}
