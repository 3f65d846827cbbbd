//! Supported media types and the conversion matrix.
//!
//! The registry is an immutable value built once at startup and passed
//! explicitly to whatever needs it. Adding a type or a conversion target is a
//! single entry in the matrix.

use std::collections::HashMap;

use crate::media::MediaType;

const IMAGE_FORMATS: &[&str] = &["image/png", "image/jpeg", "image/webp", "image/gif"];

const STANDARD_MATRIX: &[(&str, &[&str])] = &[
    ("text/plain", &["text/plain"]),
    ("text/markdown", &["text/markdown", "text/html", "text/plain"]),
    ("text/html", &["text/html", "text/plain"]),
    ("application/json", &["application/json", "text/plain"]),
    ("image/png", IMAGE_FORMATS),
    ("image/jpeg", IMAGE_FORMATS),
    ("image/webp", IMAGE_FORMATS),
    ("image/gif", IMAGE_FORMATS),
];

#[derive(Clone, Debug)]
pub struct TypeRegistry {
    order: Vec<String>,
    formats: HashMap<String, Vec<String>>,
}

impl TypeRegistry {
    /// Build a registry from `(base type, conversion targets)` entries. Each
    /// base type is always among its own targets, first if it was missing.
    pub fn new<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [&'a str])>,
    {
        entries
            .into_iter()
            .fold(Self::empty(), |reg, (base, targets)| reg.register(base, targets))
    }

    pub fn standard() -> Self {
        Self::new(STANDARD_MATRIX.iter().copied())
    }

    fn empty() -> Self {
        Self {
            order: Vec::new(),
            formats: HashMap::new(),
        }
    }

    /// Add (or replace) one base type and its conversion targets.
    #[must_use]
    pub fn register(mut self, base: &str, targets: &[&str]) -> Self {
        let base = base.trim().to_ascii_lowercase();
        let mut list: Vec<String> = Vec::with_capacity(targets.len() + 1);
        for t in targets {
            let t = t.trim().to_ascii_lowercase();
            if !list.contains(&t) {
                list.push(t);
            }
        }
        if !list.contains(&base) {
            list.insert(0, base.clone());
        }
        if !self.formats.contains_key(&base) {
            self.order.push(base.clone());
        }
        self.formats.insert(base, list);
        self
    }

    /// True iff `value` parses as a media type whose essence is registered.
    /// Unparseable input is unsupported, not an error.
    pub fn is_supported(&self, value: &str) -> bool {
        MediaType::parse(value)
            .map(|m| self.is_supported_media(&m))
            .unwrap_or(false)
    }

    pub fn is_supported_media(&self, media: &MediaType) -> bool {
        self.formats.contains_key(media.essence())
    }

    /// Allowed conversion targets for `value`; empty for unknown or
    /// unparseable types.
    pub fn formats_for(&self, value: &str) -> &[String] {
        match MediaType::parse(value) {
            Ok(m) => self.formats_for_media(&m),
            Err(_) => &[],
        }
    }

    pub fn formats_for_media(&self, media: &MediaType) -> &[String] {
        self.formats
            .get(media.essence())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn can_convert(&self, from: &MediaType, to: &MediaType) -> bool {
        self.formats_for_media(from)
            .iter()
            .any(|t| t == to.essence())
    }

    /// Registered base types, in registration order.
    pub fn supported(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
