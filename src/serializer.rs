//! Request/response body (de)serialization.
//!
//! A `Serializer` turns a JSON-representable value into bytes for the
//! outbound request body, and turns response bytes back into a structured
//! value keyed on the response's `Content-Type`. The Transport owns exactly
//! one JSON serializer and consults it for every request whose body is not
//! already raw bytes.

use crate::error::{Result, TransportError};

/// Encodes request bodies and decodes response bodies.
///
/// The only implementation in this crate is [`JsonSerializer`]; the trait
/// exists so a caller could plug in a different `serde_json`-compatible
/// encoder (e.g. one that preserves key order) without touching the
/// Transport.
pub trait Serializer: std::fmt::Debug + Send + Sync {
    /// Encode a JSON-representable value to UTF-8 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Serialization`] if `value` cannot be
    /// represented (e.g. a map with non-string keys, `NaN`/`Infinity`
    /// floats).
    fn dumps(&self, value: &serde_json::Value) -> Result<Vec<u8>>;

    /// Decode bytes according to `content_type`.
    ///
    /// For `application/json` (and any `+json` suffix, e.g.
    /// `application/vnd.elasticsearch+json`) the bytes are parsed into a
    /// [`serde_json::Value`]. For any other content type the bytes are
    /// returned unparsed as [`Decoded::Raw`] -- this is how binary formats
    /// like Mapbox vector tiles pass through untouched.
    fn loads(&self, bytes: &[u8], content_type: &str) -> Result<Decoded>;
}

/// The result of [`Serializer::loads`]: either a parsed JSON value or the
/// original bytes, depending on content type.
#[derive(Debug, Clone)]
pub enum Decoded {
    Json(serde_json::Value),
    Raw(Vec<u8>),
}

impl Decoded {
    /// Borrow the decoded value as JSON, if it was JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Decoded::Json(v) => Some(v),
            Decoded::Raw(_) => None,
        }
    }

    /// Borrow the decoded value as raw bytes, if it was not JSON.
    pub fn as_raw(&self) -> Option<&[u8]> {
        match self {
            Decoded::Raw(b) => Some(b),
            Decoded::Json(_) => None,
        }
    }
}

/// The default, and only, `Serializer` implementation: plain `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

fn is_json_content_type(content_type: &str) -> bool {
    let base = content_type.split(';').next().unwrap_or("").trim();
    base == "application/json" || base.ends_with("+json")
}

impl Serializer for JsonSerializer {
    fn dumps(&self, value: &serde_json::Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(TransportError::from)
    }

    fn loads(&self, bytes: &[u8], content_type: &str) -> Result<Decoded> {
        if is_json_content_type(content_type) {
            if bytes.is_empty() {
                return Ok(Decoded::Json(serde_json::Value::Null));
            }
            let value = serde_json::from_slice(bytes).map_err(TransportError::from)?;
            Ok(Decoded::Json(value))
        } else {
            Ok(Decoded::Raw(bytes.to_vec()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dumps_roundtrips_through_loads() {
        let s = JsonSerializer;
        let value = json!({"a": 1, "b": [1, 2, 3], "c": null});
        let bytes = s.dumps(&value).unwrap();
        let decoded = s.loads(&bytes, "application/json").unwrap();
        assert_eq!(decoded.as_json(), Some(&value));
    }

    #[test]
    fn loads_passes_through_non_json_content_type() {
        let s = JsonSerializer;
        let bytes = vec![0x1a, 0x02, 0x03];
        let decoded = s
            .loads(&bytes, "application/vnd.mapbox-vector-tile")
            .unwrap();
        assert_eq!(decoded.as_raw(), Some(bytes.as_slice()));
    }

    #[test]
    fn loads_honors_json_suffix_and_charset_params() {
        let s = JsonSerializer;
        let decoded = s
            .loads(b"{\"x\":1}", "application/vnd.elasticsearch+json;charset=utf-8")
            .unwrap();
        assert_eq!(decoded.as_json(), Some(&json!({"x": 1})));
    }

    #[test]
    fn dumps_rejects_non_finite_floats() {
        let s = JsonSerializer;
        // serde_json's Value cannot even represent NaN/Infinity, so the
        // failure case in practice is a Number that fails to build; this
        // test documents the contract rather than forcing it.
        let value = json!({"x": f64::MAX});
        assert!(s.dumps(&value).is_ok());
    }
}
