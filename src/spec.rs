//! Tag-spec parsing for proto-2 metric lines
//!
//! A proto-2 line looks like `http.server=web1.unit_is_ms 42 1434092005`.
//! The first field is a dot-delimited metric id whose segments encode tags:
//! `key_is_value` or `key=value` segments split into a tag pair, anything
//! else becomes a positional tag `n<i>` (1-based segment index). The `unit`
//! tag is mandatory and a `ps` unit suffix is normalized to `/s`.
//!
//! Parsing is pure: no side effects, identical results on identical input.

use std::collections::HashMap;

use thiserror::Error;

/// Marker for the preferred tag separator inside an id segment.
const IS_MARKER: &str = "_is_";

/// A parsed proto-2 metric: the verbatim metric id plus its extracted tags.
///
/// The id is kept untouched because it is the deduplication key; tags are
/// derived data for the index document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSpec {
    pub metric_id: String,
    pub tags: HashMap<String, String>,
}

/// Reasons a proto-2 line can fail validation.
///
/// Each variant is counted separately nowhere; the classifier only needs
/// pass/fail, but the distinct reasons make logs and tests precise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The line does not split on single spaces into exactly 3 fields.
    #[error("metric line does not contain exactly 3 space-separated fields")]
    MalformedLine,

    /// An id segment contains more than one separator, so the key/value
    /// split is ambiguous.
    #[error("tag segment '{0}' contains more than one separator")]
    AmbiguousTagSegment(String),

    /// A segment split produced an empty key or an empty value.
    #[error("tag segment '{0}' has an empty key or value")]
    EmptyTagComponent(String),

    /// The mandatory `unit` tag is absent.
    #[error("mandatory 'unit' tag not specified")]
    MissingUnitTag,

    /// Fewer than 2 tags after normalization (only `unit` is not enough).
    #[error("metric must have at least one tag beyond 'unit'")]
    InsufficientTags,
}

/// Parse a trimmed proto-2 line (`metric_spec value unix_timestamp`) into a
/// [`MetricSpec`].
///
/// The value and timestamp fields are required for line shape but their
/// contents are not interpreted here.
pub fn parse_tag_spec(line: &str) -> Result<MetricSpec, ParseError> {
    let fields: Vec<&str> = line.split(' ').collect();
    if fields.len() != 3 {
        return Err(ParseError::MalformedLine);
    }
    let metric_id = fields[0];

    let mut tags = HashMap::new();
    for (i, segment) in metric_id.split('.').enumerate() {
        // `_is_` takes precedence so values may themselves contain `=`.
        let separator = if segment.contains(IS_MARKER) {
            IS_MARKER
        } else {
            "="
        };
        let parts: Vec<&str> = segment.split(separator).collect();
        match parts.as_slice() {
            [key, value] => {
                if key.is_empty() || value.is_empty() {
                    return Err(ParseError::EmptyTagComponent(segment.to_string()));
                }
                tags.insert(key.to_string(), value.to_string());
            }
            // No separator at all: positional tag, named by segment index.
            [_] => {
                tags.insert(format!("n{}", i + 1), segment.to_string());
            }
            _ => return Err(ParseError::AmbiguousTagSegment(segment.to_string())),
        }
    }

    // Rate units arrive as e.g. `Bps`; store the canonical `B/s`.
    let normalized = match tags.get("unit") {
        None => return Err(ParseError::MissingUnitTag),
        Some(unit) => unit.strip_suffix("ps").map(|stem| format!("{}/s", stem)),
    };
    if let Some(normalized) = normalized {
        tags.insert("unit".to_string(), normalized);
    }

    if tags.len() < 2 {
        return Err(ParseError::InsufficientTags);
    }

    Ok(MetricSpec {
        metric_id: metric_id.to_string(),
        tags,
    })
}
