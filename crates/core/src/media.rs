//! Content-Type parsing: `type/subtype` plus `; name=value` parameters.

use std::{fmt, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[!#$%&'*+.^_`|~0-9A-Za-z-]+$").expect("valid regex"));

fn is_token(s: &str) -> bool {
    TOKEN.is_match(s)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaTypeError {
    #[error("media type is empty")]
    Empty,
    #[error("invalid media type: {0}")]
    InvalidEssence(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// A parsed media type. The essence and parameter names are lowercased, as
/// is the charset value; other parameter values keep their case.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MediaType {
    essence: String,
    params: Vec<(String, String)>,
}

impl MediaType {
    pub fn parse(input: &str) -> Result<Self, MediaTypeError> {
        let input = input.trim();
        let (head, mut rest) = match input.find(';') {
            Some(i) => (&input[..i], &input[i..]),
            None => (input, ""),
        };
        let head = head.trim();
        if head.is_empty() {
            return Err(MediaTypeError::Empty);
        }
        let (top, sub) = head
            .split_once('/')
            .ok_or_else(|| MediaTypeError::InvalidEssence(head.to_owned()))?;
        if !is_token(top) || !is_token(sub) {
            return Err(MediaTypeError::InvalidEssence(head.to_owned()));
        }

        let mut params = Vec::new();
        while let Some(after) = rest.strip_prefix(';') {
            let after = after.trim_start();
            let eq = after
                .find(['=', ';'])
                .filter(|&i| after.as_bytes()[i] == b'=')
                .ok_or_else(|| MediaTypeError::InvalidParameter(after.to_owned()))?;
            let name = after[..eq].trim();
            if !is_token(name) {
                return Err(MediaTypeError::InvalidParameter(name.to_owned()));
            }
            let value_part = &after[eq + 1..];
            let (value, remaining) = match value_part.strip_prefix('"') {
                Some(quoted) => parse_quoted(quoted)?,
                None => {
                    let end = value_part.find(';').unwrap_or(value_part.len());
                    let value = value_part[..end].trim();
                    if !is_token(value) {
                        return Err(MediaTypeError::InvalidParameter(format!("{name}={value}")));
                    }
                    (value.to_owned(), &value_part[end..])
                }
            };
            let name = name.to_ascii_lowercase();
            let value = if name == "charset" {
                value.to_ascii_lowercase()
            } else {
                value
            };
            params.push((name, value));
            rest = remaining.trim_start();
        }
        if !rest.is_empty() {
            return Err(MediaTypeError::InvalidParameter(rest.to_owned()));
        }

        Ok(Self {
            essence: head.to_ascii_lowercase(),
            params,
        })
    }

    /// `type/subtype` without parameters.
    pub fn essence(&self) -> &str {
        &self.essence
    }

    pub fn top_level(&self) -> &str {
        self.essence
            .split_once('/')
            .map(|(top, _)| top)
            .unwrap_or(&self.essence)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn charset(&self) -> Option<&str> {
        self.param("charset")
    }

    pub fn is_text(&self) -> bool {
        self.top_level() == "text"
    }

    pub fn is_image(&self) -> bool {
        self.top_level() == "image"
    }

    pub fn same_essence(&self, other: &MediaType) -> bool {
        self.essence == other.essence
    }
}

fn parse_quoted(input: &str) -> Result<(String, &str), MediaTypeError> {
    let mut value = String::new();
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => break,
            },
            '"' => return Ok((value, &input[i + 1..])),
            other => value.push(other),
        }
    }
    Err(MediaTypeError::InvalidParameter(format!(
        "unterminated quoted string: \"{input}"
    )))
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.essence)?;
        for (name, value) in &self.params {
            if is_token(value) {
                write!(f, "; {name}={value}")?;
            } else {
                let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "; {name}=\"{escaped}\"")?;
            }
        }
        Ok(())
    }
}

impl FromStr for MediaType {
    type Err = MediaTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MediaType {
    type Error = MediaTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MediaType> for String {
    fn from(value: MediaType) -> Self {
        value.to_string()
    }
}
