use std::fmt::Display;
use std::fmt::Formatter;
use std::str::FromStr;

/// Simple enum for media types
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Feature film
    Film,
    /// Episodic series
    Series,
}

impl MediaType {
    /// Single-character form used in cache keys.
    pub fn type_char(&self) -> char {
        match self {
            MediaType::Film => 'm',
            MediaType::Series => 's',
        }
    }
}

impl Display for MediaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaType::Film => write!(f, "film"),
            MediaType::Series => write!(f, "series"),
        }
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "film" | "movie" | "m" => Ok(MediaType::Film),
            "series" | "show" | "s" => Ok(MediaType::Series),
            other => Err(format!("unknown media type: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_spellings() {
        assert_eq!("movie".parse::<MediaType>().unwrap(), MediaType::Film);
        assert_eq!("Series".parse::<MediaType>().unwrap(), MediaType::Series);
        assert!("album".parse::<MediaType>().is_err());
    }

    #[test]
    fn type_chars_are_stable() {
        assert_eq!(MediaType::Film.type_char(), 'm');
        assert_eq!(MediaType::Series.type_char(), 's');
    }
}
