//! URL pattern matching.
//!
//! Patterns come in three shapes:
//!
//! - `*` on its own matches every URL.
//! - A pattern containing `*` is a wildcard pattern. Every other character
//!   is literal, each `*` matches any run of characters, and the whole URL
//!   must match.
//! - Anything else matches by substring, so `api.example.com` matches
//!   `https://api.example.com/v1/users`.

use crate::error::InterceptError;
use regex::Regex;
use std::collections::HashMap;

const WILDCARD: char = '*';

/// A compiled URL pattern.
#[derive(Debug, Clone)]
pub enum UrlPattern {
    /// The lone `*` pattern.
    Any,
    /// Anchored regex built from a wildcard pattern.
    Wildcard { source: String, regex: Regex },
    /// Substring containment.
    Contains(String),
    /// A wildcard pattern whose regex could not be built. Never matches.
    Invalid { source: String, reason: String },
}

impl UrlPattern {
    /// Compile a pattern. Never fails; see [`UrlPattern::try_compile`].
    pub fn compile(pattern: &str) -> Self {
        match Self::try_compile(pattern) {
            Ok(compiled) => compiled,
            Err(e) => UrlPattern::Invalid {
                source: pattern.to_string(),
                reason: e.to_string(),
            },
        }
    }

    /// Compile a pattern, reporting regex build failures.
    pub fn try_compile(pattern: &str) -> Result<Self, InterceptError> {
        if pattern == "*" {
            return Ok(UrlPattern::Any);
        }
        if !pattern.contains(WILDCARD) {
            return Ok(UrlPattern::Contains(pattern.to_string()));
        }

        let body = pattern
            .split(WILDCARD)
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^{}$", body)).map_err(|e| {
            InterceptError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(UrlPattern::Wildcard {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Check a URL against this pattern.
    pub fn is_match(&self, url: &str) -> bool {
        match self {
            UrlPattern::Any => true,
            UrlPattern::Wildcard { regex, .. } => regex.is_match(url),
            UrlPattern::Contains(needle) => url.contains(needle.as_str()),
            UrlPattern::Invalid { .. } => false,
        }
    }

    /// The pattern text as registered.
    pub fn as_str(&self) -> &str {
        match self {
            UrlPattern::Any => "*",
            UrlPattern::Wildcard { source, .. } => source,
            UrlPattern::Contains(needle) => needle,
            UrlPattern::Invalid { source, .. } => source,
        }
    }
}

/// Check a URL against an uncompiled pattern.
pub fn matches(url: &str, pattern: &str) -> bool {
    UrlPattern::compile(pattern).is_match(url)
}

/// Split the query string off a URL, if there is one.
pub fn query_of(url: &str) -> Option<&str> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    without_fragment.split_once('?').map(|(_, q)| q)
}

/// Parse a query string into key-value pairs.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        if let Some((key, value)) = part.split_once('=') {
            params.insert(urlencoding_decode(key), urlencoding_decode(value));
        } else {
            params.insert(urlencoding_decode(part), String::new());
        }
    }

    params
}

/// Percent-decoding with `+` as space. Invalid escapes are kept verbatim.
fn urlencoding_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
