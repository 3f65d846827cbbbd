use std::sync::LazyLock;

use regex::Regex;

use crate::errors::ValidationError;
use crate::media::MediaType;

/// Largest body accepted for a single fragment write, in bytes.
pub const DEFAULT_MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

static FRAGMENT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("valid regex"));

/// Fragment ids must be safe as a path component and never contain `.`,
/// which separates an id from a requested extension.
pub fn is_valid_fragment_id(id: &str) -> bool {
    id.len() <= 128 && FRAGMENT_ID.is_match(id)
}

pub fn check_body_size(limit: usize, actual: usize) -> Result<(), ValidationError> {
    if actual > limit {
        Err(ValidationError::PayloadTooLarge { limit, actual })
    } else {
        Ok(())
    }
}

/// Reject payloads that must never be stored: empty or whitespace-only
/// bodies, UTF-8 text (declared, or `text/*` without a charset) that is not
/// UTF-8, and JSON that does not parse.
pub fn validate_payload(media: &MediaType, data: &[u8]) -> Result<(), ValidationError> {
    if data.is_empty() {
        return Err(ValidationError::EmptyData);
    }
    let text = std::str::from_utf8(data);
    if matches!(text, Ok(s) if s.trim().is_empty()) {
        return Err(ValidationError::EmptyData);
    }
    let wants_utf8 = match media.charset() {
        Some(charset) => charset == "utf-8",
        None => media.is_text() || media.essence() == "application/json",
    };
    if wants_utf8 {
        if let Err(e) = text {
            return Err(ValidationError::InvalidData(format!(
                "{} payload is not valid utf-8: {e}",
                media.essence()
            )));
        }
    }
    if media.essence() == "application/json" {
        serde_json::from_slice::<serde::de::IgnoredAny>(data)
            .map_err(|e| ValidationError::InvalidData(format!("malformed json: {e}")))?;
    }
    Ok(())
}

/// Sizes arrive as JSON numbers in stored records; only non-negative
/// integers are meaningful.
pub fn size_from_number(n: &serde_json::Number) -> Result<u64, ValidationError> {
    n.as_u64()
        .ok_or_else(|| ValidationError::InvalidSize(n.to_string()))
}
