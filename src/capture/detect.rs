//! Link and postal-address detection
//!
//! Scans captured text for web links (deduplicated) and street addresses
//! (last match wins).

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref LINK_RE: Regex =
        Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"'）)\]]+"#).expect("link regex");
    static ref ADDRESS_RE: Regex = Regex::new(
        r"(?i)\b\d{1,6}\s+(?:[A-Za-z][A-Za-z'.-]*\s+){1,4}(?:street|st|avenue|ave|road|rd|boulevard|blvd|lane|ln|drive|dr|court|ct|place|pl|way|square|sq|terrace|ter)\.?\b"
    )
    .expect("address regex");
}

/// Links found in `text`, first occurrence order, deduplicated.
pub fn detect_links(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for m in LINK_RE.find_iter(text) {
        let link = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
        if !seen.iter().any(|s| s == link) {
            seen.push(link.to_string());
        }
    }
    seen
}

/// The last street address mentioned in `text`, if any.
pub fn detect_address(text: &str) -> Option<String> {
    ADDRESS_RE
        .find_iter(text)
        .last()
        .map(|m| m.as_str().to_string())
}
