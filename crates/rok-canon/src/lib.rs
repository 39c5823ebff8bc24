// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Deterministic canonicalization and SHA-256 content hashing."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Every signed or hash-chained artifact in the kernel (packages, manifests,
//! audit events) is hashed over its *canonical form*, not its wire
//! representation: object keys are sorted, there is exactly one encoding for
//! each value, and floating-point numbers are rejected outright since IEEE
//! 754 has no single canonical text form. [`canonical_bytes`] produces that
//! form; [`content_hash`] hashes it.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// A value could not be put into canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonError {
    /// A JSON number was a float, `NaN`, or otherwise not a canonical integer.
    NonCanonicalNumber {
        /// Dotted path to the offending value (e.g. `"manifest.impact_score"`).
        path: String,
    },
    /// The value could not be serialized to JSON at all.
    Serialization {
        /// Underlying serde error message.
        message: String,
    },
}

impl fmt::Display for CanonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonCanonicalNumber { path } => {
                write!(f, "non-canonical number at `{path}` (floats are not allowed)")
            }
            Self::Serialization { message } => write!(f, "serialization failed: {message}"),
        }
    }
}

impl std::error::Error for CanonError {}

impl From<CanonError> for rok_error::RokError {
    fn from(err: CanonError) -> Self {
        rok_error::RokError::new(rok_error::ErrorCode::Uncanonicalizable, err.to_string())
    }
}

/// A canonical value tree: a strict subset of JSON with a single encoding
/// per value. Object keys are held in a [`BTreeMap`] so iteration order is
/// always lexicographic; there is no floating-point variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalValue {
    /// JSON `null`.
    Null,
    /// JSON `true`/`false`.
    Bool(bool),
    /// A signed 64-bit integer. All JSON numbers in kernel payloads are
    /// integral (counts, timestamps in epoch millis, monetary minor units).
    Int(i64),
    /// A UTF-8 string.
    String(String),
    /// An ordered sequence of values.
    Array(Vec<CanonicalValue>),
    /// A sorted key-value map.
    Object(BTreeMap<String, CanonicalValue>),
}

impl CanonicalValue {
    /// Serialize `value` into canonical JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CanonError::Serialization`] if `value` cannot be represented
    /// as JSON at all, or [`CanonError::NonCanonicalNumber`] if it contains a
    /// float or a number outside the `i64` range.
    pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonError> {
        Ok(Self::to_string_canonical(value)?.into_bytes())
    }

    /// Serialize `value` into a canonical JSON string.
    ///
    /// # Errors
    ///
    /// See [`CanonicalValue::to_bytes`].
    pub fn to_string_canonical<T: Serialize>(value: &T) -> Result<String, CanonError> {
        let json = serde_json::to_value(value).map_err(|e| CanonError::Serialization {
            message: e.to_string(),
        })?;
        let canon = from_json(json, "$")?;
        Ok(canon.render())
    }

    fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        match self {
            Self::Null => out.push_str("null"),
            Self::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Self::Int(i) => out.push_str(&i.to_string()),
            Self::String(s) => {
                out.push('"');
                for c in s.chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\t' => out.push_str("\\t"),
                        c if (c as u32) < 0x20 => {
                            out.push_str(&format!("\\u{:04x}", c as u32));
                        }
                        c => out.push(c),
                    }
                }
                out.push('"');
            }
            Self::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.render_into(out);
                }
                out.push(']');
            }
            Self::Object(map) => {
                out.push('{');
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    Self::String(k.clone()).render_into(out);
                    out.push(':');
                    v.render_into(out);
                }
                out.push('}');
            }
        }
    }
}

fn from_json(value: Value, path: &str) -> Result<CanonicalValue, CanonError> {
    match value {
        Value::Null => Ok(CanonicalValue::Null),
        Value::Bool(b) => Ok(CanonicalValue::Bool(b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(CanonicalValue::Int(i))
            } else {
                Err(CanonError::NonCanonicalNumber {
                    path: path.to_string(),
                })
            }
        }
        Value::String(s) => Ok(CanonicalValue::String(s)),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                out.push(from_json(item, &format!("{path}[{i}]"))?);
            }
            Ok(CanonicalValue::Array(out))
        }
        Value::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                let child_path = format!("{path}.{k}");
                out.insert(k, from_json(v, &child_path)?);
            }
            Ok(CanonicalValue::Object(out))
        }
    }
}

/// Serialize `value` into canonical JSON bytes. Shorthand for
/// [`CanonicalValue::to_bytes`].
///
/// # Errors
///
/// See [`CanonicalValue::to_bytes`].
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonError> {
    CanonicalValue::to_bytes(value)
}

/// Compute the lowercase hex-encoded SHA-256 hash of `value`'s canonical
/// form.
///
/// # Errors
///
/// See [`CanonicalValue::to_bytes`].
///
/// # Examples
///
/// ```
/// use rok_canon::content_hash;
/// use serde_json::json;
///
/// let a = content_hash(&json!({"b": 2, "a": 1})).unwrap();
/// let b = content_hash(&json!({"a": 1, "b": 2})).unwrap();
/// assert_eq!(a, b, "key order must not affect the hash");
/// ```
pub fn content_hash<T: Serialize>(value: &T) -> Result<String, CanonError> {
    let bytes = canonical_bytes(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_output() {
        let a = CanonicalValue::to_string_canonical(&json!({"z": 1, "a": 2})).unwrap();
        let b = CanonicalValue::to_string_canonical(&json!({"a": 2, "z": 1})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, r#"{"a":2,"z":1}"#);
    }

    #[test]
    fn nested_structures_canonicalize_recursively() {
        let v = json!({"outer": {"z": [3, 2, 1], "a": null}});
        let s = CanonicalValue::to_string_canonical(&v).unwrap();
        assert_eq!(s, r#"{"outer":{"a":null,"z":[3,2,1]}}"#);
    }

    #[test]
    fn floats_are_rejected() {
        let v = json!({"score": 1.5});
        let err = CanonicalValue::to_string_canonical(&v).unwrap_err();
        assert!(matches!(err, CanonError::NonCanonicalNumber { path } if path == "$.score"));
    }

    #[test]
    fn content_hash_is_stable_and_hex() {
        let h1 = content_hash(&json!({"a": 1})).unwrap();
        let h2 = content_hash(&json!({"a": 1})).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn distinct_values_hash_differently() {
        let h1 = content_hash(&json!({"a": 1})).unwrap();
        let h2 = content_hash(&json!({"a": 2})).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn strings_with_control_characters_escape_correctly() {
        let v = json!({"note": "line1\nline2\ttab"});
        let s = CanonicalValue::to_string_canonical(&v).unwrap();
        assert_eq!(s, r#"{"note":"line1\nline2\ttab"}"#);
    }

    proptest::proptest! {
        #[test]
        fn canonicalization_is_deterministic_for_arbitrary_int_maps(
            pairs in proptest::collection::vec((".{1,8}", -1_000_000i64..1_000_000), 0..8)
        ) {
            let map: BTreeMap<String, i64> = pairs.into_iter().collect();
            let a = CanonicalValue::to_string_canonical(&map).unwrap();
            let b = CanonicalValue::to_string_canonical(&map).unwrap();
            proptest::prop_assert_eq!(a, b);
        }
    }
}
