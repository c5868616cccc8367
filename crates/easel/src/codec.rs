//! Detection, extraction and redaction of base64 image payloads embedded in
//! free-form message text.
//!
//! Everything here is a regex heuristic. The orchestrator only depends on
//! [`extract`], [`extract_from_parts`] and [`redact`].

use lazy_static::lazy_static;
use regex::Regex;

use crate::models::content::ContentPart;

/// Minimum length of a bare base64 run treated as an image during extraction
const MIN_EXTRACT_RUN: usize = 100;
/// Minimum length of a bare base64 run stripped during redaction
const MIN_REDACT_RUN: usize = 200;
const MAX_REDACT_PASSES: usize = 3;

lazy_static! {
    static ref STRINGIFIED_OBJECT: Regex = Regex::new(r"\[object (Promise|Object)\]").unwrap();

    /// Ordered extraction patterns; the payload is always capture group 1
    static ref EXTRACT_PATTERNS: Vec<Regex> = vec![
        // base64 = "...."
        Regex::new(r#"base64\s*=\s*["']([A-Za-z0-9+/=]+)["']"#).unwrap(),
        // base64_url = "data:image/...;base64,...."
        Regex::new(r#"(?i)base64_url\s*=\s*["']data:image/[^;]+;base64,([A-Za-z0-9+/=]+)["']"#).unwrap(),
        // <img src="data:image/...;base64,...." />
        Regex::new(r#"(?i)<img[^>]+src\s*=\s*["']data:image/[^;]+;base64,([A-Za-z0-9+/=]+)["'][^>]*>"#).unwrap(),
        // data:image/...;base64,....
        Regex::new(r"(?i)data:image/[^;]+;base64,([A-Za-z0-9+/=]+)").unwrap(),
        // long bare base64 run
        Regex::new(&format!(r"([A-Za-z0-9+/=]{{{},}})", MIN_EXTRACT_RUN)).unwrap(),
    ];

    /// Ordered redaction patterns, most specific first
    static ref REDACT_PATTERNS: Vec<Regex> = vec![
        // <img> with a quoted data URL source
        Regex::new(r#"(?i)<img[^>]*src\s*=\s*["']data:image/[^;]+;base64,[^"']*["'][^>]*/?>"#).unwrap(),
        // <img> with an escaped-quote source, as found in stringified JSON
        Regex::new(r#"(?i)<img[^>]*src\s*=\s*\\"data:image/[^;]+;base64,[^\\"]*\\"[^>]*/?>"#).unwrap(),
        // <img> with an unquoted source
        Regex::new(r"(?i)<img[^>]*src\s*=\s*data:image/[^;]+;base64,[^\s>]*[^>]*/?>").unwrap(),
        // ![alt](data:image/...)
        Regex::new(r"(?i)!\[[^\]]*\]\(data:image/[^;]+;base64,[^)]*\)").unwrap(),
        // bare data URL, including payloads wrapped over several lines
        Regex::new(r"(?i)data:image/[^;\s]+;base64,[A-Za-z0-9+/=]*(?:[ \t]*\r?\n[ \t]*[A-Za-z0-9+/=]{16,})*").unwrap(),
        // leftover long base64 runs
        Regex::new(&format!(r"[A-Za-z0-9+/=]{{{},}}", MIN_REDACT_RUN)).unwrap(),
    ];
}

/// Find the base64 payload of an image embedded in `content`.
///
/// Returns the first match of the assignment, `base64_url`, `<img>`, data URL
/// and bare-run forms, tried in that order. The payload is not validated.
pub fn extract(content: &str) -> Option<String> {
    if content.is_empty() {
        return None;
    }

    if STRINGIFIED_OBJECT.is_match(content) {
        tracing::debug!("skipping content with a stringified object marker");
        return None;
    }

    EXTRACT_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(content)
            .and_then(|captures| captures.get(1))
            .map(|payload| payload.as_str().to_string())
    })
}

/// Find the payload of the first `data:image/` URL among `image_url` parts.
pub fn extract_from_parts(parts: &[ContentPart]) -> Option<String> {
    parts
        .iter()
        .filter_map(ContentPart::as_image_url)
        .filter(|url| is_data_image_url(url))
        .find_map(extract)
}

pub fn is_data_image_url(url: &str) -> bool {
    url.get(..11)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:image/"))
}

/// Strip every embedded image payload from `content`.
///
/// Patterns are reapplied until a pass removes nothing, so the result never
/// holds a base64 run of 200 or more characters and redacting it again is a
/// no-op.
pub fn redact(content: &str) -> String {
    let mut redacted = content.to_string();

    for _ in 0..MAX_REDACT_PASSES {
        let before = redacted.len();
        for pattern in REDACT_PATTERNS.iter() {
            if pattern.is_match(&redacted) {
                redacted = pattern.replace_all(&redacted, "").into_owned();
            }
        }
        if redacted.len() == before {
            break;
        }
    }

    redacted
}
