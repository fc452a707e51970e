//! Composite keys for junction relations.
//!
//! Junction rows (product distributors, opportunity contacts) have no surrogate
//! id of their own. They are addressed by `"{owner_id}-{related_id}"`, e.g.
//! `"12-7"` for distributor 7 on product 12.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Separator between the owner and related halves of a key.
const SEPARATOR: char = '-';

/// Two-part natural key of a junction row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey {
    pub owner_id: i64,
    pub related_id: i64,
}

/// A string that does not decode to a [`CompositeKey`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositeKeyError {
    /// The key has no separator, or more than one.
    #[error("Malformed composite key '{key}': expected '<ownerId>-<relatedId>'")]
    Shape { key: String },

    /// One half is empty or not a base-10 integer.
    #[error("Malformed composite key '{key}': {part} '{value}' is not an integer")]
    Part {
        key: String,
        part: &'static str,
        value: String,
    },
}

impl CompositeKey {
    #[must_use]
    pub const fn new(owner_id: i64, related_id: i64) -> Self {
        Self {
            owner_id,
            related_id,
        }
    }

    /// Wire form of the key.
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parse a wire-form key.
    ///
    /// Splits on the first `-`; anything other than exactly two integer halves
    /// is an error. There is no fallback value.
    pub fn decode(key: &str) -> Result<Self, CompositeKeyError> {
        let Some((owner, related)) = key.split_once(SEPARATOR) else {
            return Err(CompositeKeyError::Shape {
                key: key.to_string(),
            });
        };
        if related.contains(SEPARATOR) {
            return Err(CompositeKeyError::Shape {
                key: key.to_string(),
            });
        }

        Ok(Self {
            owner_id: parse_part(key, "owner id", owner)?,
            related_id: parse_part(key, "related id", related)?,
        })
    }
}

fn parse_part(key: &str, part: &'static str, value: &str) -> Result<i64, CompositeKeyError> {
    // i64::from_str accepts a leading '+', which the wire format does not.
    let digits_only = !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit());
    let parsed = if digits_only { value.parse().ok() } else { None };
    parsed.ok_or_else(|| CompositeKeyError::Part {
        key: key.to_string(),
        part,
        value: value.to_string(),
    })
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.owner_id, self.related_id)
    }
}

impl FromStr for CompositeKey {
    type Err = CompositeKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_format() {
        assert_eq!(CompositeKey::new(12, 7).encode(), "12-7");
        assert_eq!(CompositeKey::new(0, 0).to_string(), "0-0");
    }

    #[test]
    fn test_round_trip_edges() {
        for (a, b) in [(0, 0), (1, 2), (42, 0), (i64::MAX, i64::MAX), (9_007_199_254_740_993, 3)] {
            let key = CompositeKey::new(a, b);
            assert_eq!(CompositeKey::decode(&key.encode()), Ok(key));
        }
    }

    #[test]
    fn test_decode_rejects_missing_separator() {
        let err = CompositeKey::decode("abc").unwrap_err();
        assert!(matches!(err, CompositeKeyError::Shape { .. }));
        assert!(err.to_string().contains("'abc'"));
    }

    #[test]
    fn test_decode_rejects_extra_parts() {
        assert!(matches!(
            CompositeKey::decode("1-2-3"),
            Err(CompositeKeyError::Shape { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_non_numeric_half() {
        let err = CompositeKey::decode("1-x").unwrap_err();
        assert_eq!(
            err,
            CompositeKeyError::Part {
                key: "1-x".to_string(),
                part: "related id",
                value: "x".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_rejects_empty_halves() {
        assert!(CompositeKey::decode("").is_err());
        assert!(CompositeKey::decode("-1").is_err());
        assert!(CompositeKey::decode("1-").is_err());
        assert!(CompositeKey::decode(" 1-2").is_err());
        assert!(CompositeKey::decode("+1-2").is_err());
    }

    #[test]
    fn test_from_str() {
        let key: CompositeKey = "5-9".parse().unwrap();
        assert_eq!(key, CompositeKey::new(5, 9));
    }
}
