//! Extracts Google Drive file IDs from share URLs.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{FetchError, Result};

/// `/file/d/<ID>` links, including Docs editors (`/document/d/<ID>`).
static PATH_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(?:drive|docs)\.google\.com/(?:file|document|spreadsheets|presentation)/(?:u/\d+/)?d/([a-zA-Z0-9_-]+)",
    )
    .expect("Invalid path URL regex")
});

/// `open?id=<ID>` and `uc?export=download&id=<ID>` links.
static QUERY_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://drive\.google\.com/(?:open|uc)\?(?:[^#]*&)?id=([a-zA-Z0-9_-]+)")
        .expect("Invalid query URL regex")
});

static ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("Invalid ID regex"));

/// Extract a Drive file ID from a share URL, or validate a raw ID.
///
/// # Examples
///
/// ```
/// use drive_fetch::url_parser::extract_id;
///
/// let id = extract_id("https://drive.google.com/file/d/1abc123/view").unwrap();
/// assert_eq!(id, "1abc123");
///
/// let id = extract_id("https://drive.google.com/uc?export=download&id=1abc123").unwrap();
/// assert_eq!(id, "1abc123");
/// ```
pub fn extract_id(url_or_id: &str) -> Result<String> {
    let trimmed = url_or_id.trim();

    for regex in [&*PATH_URL_REGEX, &*QUERY_URL_REGEX] {
        if let Some(id) = regex.captures(trimmed).and_then(|c| c.get(1)) {
            return Ok(id.as_str().to_string());
        }
    }

    if ID_REGEX.is_match(trimmed) {
        return Ok(trimmed.to_string());
    }

    Err(FetchError::InvalidUrlOrId(url_or_id.to_string()))
}
