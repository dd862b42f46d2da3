use crate::PreviewError;
use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_width::UnicodeWidthChar;
use url::Url;

/// A URL after parsing and percent-encoding normalization.
///
/// Used both as the cache key and as the fetch target, so two spellings of the
/// same logical URL always land on the same cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedUrl(String);

impl NormalizedUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Parses `raw` and re-serializes it with the WHATWG percent-encoding rules.
///
/// Only `http` and `https` targets are accepted.
pub fn normalize_url(raw: &str) -> Result<NormalizedUrl, PreviewError> {
    let parsed = Url::parse(raw.trim())
        .map_err(|e| PreviewError::InvalidUrl(format!("{raw}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(PreviewError::InvalidUrl(format!(
                "{raw}: unsupported scheme '{other}'"
            )))
        }
    }

    if parsed.host_str().is_none() {
        return Err(PreviewError::InvalidUrl(format!("{raw}: missing host")));
    }

    Ok(NormalizedUrl(parsed.into()))
}

/// Converts an attribute name such as `og:image:width` into `ogImageWidth`.
///
/// Words are split on any non-alphanumeric character, on lower-to-upper case
/// transitions, at the end of an acronym and between letters and digits.
pub fn camel_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (index, word) in split_words(input).into_iter().enumerate() {
        let lower = word.to_lowercase();
        if index == 0 {
            out.push_str(&lower);
            continue;
        }
        let mut chars = lower.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

fn split_words(input: &str) -> Vec<String> {
    let mut words = Vec::new();

    for segment in input.split(|c: char| !c.is_alphanumeric()) {
        let chars: Vec<char> = segment.chars().collect();
        let mut current = String::new();

        for (i, &c) in chars.iter().enumerate() {
            if let Some(&prev) = i.checked_sub(1).and_then(|p| chars.get(p)) {
                let next = chars.get(i + 1).copied();
                let boundary = (prev.is_lowercase() && c.is_uppercase())
                    || (prev.is_alphabetic() && c.is_numeric())
                    || (prev.is_numeric() && c.is_alphabetic())
                    || (prev.is_uppercase()
                        && c.is_uppercase()
                        && next.is_some_and(|n| n.is_lowercase()));
                if boundary && !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            current.push(c);
        }

        if !current.is_empty() {
            words.push(current);
        }
    }

    words
}

/// Safely truncate a string, ensuring it is not truncated in the middle of multi-byte characters
///
/// The output's display width never exceeds `max_width`, ellipsis included.
pub fn truncate_str(s: &str, max_width: usize) -> String {
    use unicode_width::UnicodeWidthStr;

    if s.width() <= max_width {
        return s.to_string();
    }

    let mut result = String::new();
    let mut current_width = 0;

    for c in s.chars() {
        let char_width = c.width().unwrap_or(1);

        if current_width + char_width + 3 > max_width {
            break;
        }

        result.push(c);
        current_width += char_width;
    }

    result.push_str("...");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("Hello, world!", 10), "Hello, ...");
        assert_eq!(truncate_str("你好，世界！", 8), "你好...");
        assert_eq!(truncate_str("Hi!", 10), "Hi!");
    }

    #[test]
    fn test_normalize_encodes_spaces() {
        let first = normalize_url("http://x.com/a b").unwrap();
        let second = normalize_url("http://x.com/a b").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str(), "http://x.com/a%20b");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_url("HTTP://Example.COM/path?q=a b").unwrap();
        let twice = normalize_url(once.as_str()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.as_str(), "http://example.com/path?q=a%20b");
    }

    #[test]
    fn test_normalize_rejects_bad_input() {
        assert!(matches!(
            normalize_url("not-a-valid-url"),
            Err(PreviewError::InvalidUrl(_))
        ));
        assert!(matches!(
            normalize_url("ftp://example.com/file"),
            Err(PreviewError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("og:title"), "ogTitle");
        assert_eq!(camel_case("og:image:width"), "ogImageWidth");
        assert_eq!(camel_case("article:published_time"), "articlePublishedTime");
        assert_eq!(camel_case("fb:app_id"), "fbAppId");
        assert_eq!(camel_case("og:URL"), "ogUrl");
        assert_eq!(camel_case("twitterCard"), "twitterCard");
        assert_eq!(camel_case("XMLHttpRequest"), "xmlHttpRequest");
        assert_eq!(camel_case("image2x"), "image2X");
        assert_eq!(camel_case("--og--title--"), "ogTitle");
        assert_eq!(camel_case(""), "");
    }
}
