//! Deterministic request shaping: path composition, parameter escaping,
//! body encoding, and header assembly.
//!
//! None of these functions perform I/O; they're pure transformations the
//! Transport applies before handing a request to a [`crate::connection::Connection`].

use std::collections::BTreeMap;

use base64::Engine;
use percent_encoding::{AsciiSet, CONTROLS};

use crate::config::AuthValue;
use crate::error::{Result, TransportError};
use crate::serializer::Serializer;

/// Characters percent-encoded in a path segment, preserving `,` and `*` for
/// readable logs the way the reference client does.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'%')
    .add(b'&')
    .add(b'+');

/// A dynamically-typed parameter value, standing in for the set of types
/// the original client accepts interchangeably for query parameters and
/// path segments.
#[derive(Debug, Clone)]
pub enum Param {
    Str(String),
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(chrono::NaiveDate),
    DateTime(chrono::DateTime<chrono::Utc>),
    List(Vec<Param>),
}

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Param::Str(s.to_string())
    }
}

impl From<String> for Param {
    fn from(s: String) -> Self {
        Param::Str(s)
    }
}

impl From<bool> for Param {
    fn from(b: bool) -> Self {
        Param::Bool(b)
    }
}

impl From<i64> for Param {
    fn from(i: i64) -> Self {
        Param::Int(i)
    }
}

/// Global query parameters recognized on every API call, per the spec's
/// decorator contract.
pub const GLOBAL_PARAMS: &[&str] = &["pretty", "human", "error_trace", "format", "filter_path"];

/// Escape a single parameter value to UTF-8 bytes, following the rules:
/// sequences comma-join, dates/datetimes go ISO-8601, booleans become
/// `"true"`/`"false"`, bytes pass through untouched, everything else is
/// stringified.
pub fn escape_param(value: &Param) -> Vec<u8> {
    match value {
        Param::Bytes(b) => b.clone(),
        Param::List(items) => {
            let joined = items
                .iter()
                .map(|p| String::from_utf8_lossy(&escape_param(p)).into_owned())
                .collect::<Vec<_>>()
                .join(",");
            joined.into_bytes()
        }
        Param::Date(d) => d.format("%Y-%m-%d").to_string().into_bytes(),
        Param::DateTime(dt) => dt.to_rfc3339().into_bytes(),
        Param::Bool(b) => if *b { "true" } else { "false" }.to_string().into_bytes(),
        Param::Str(s) => s.clone().into_bytes(),
        Param::Int(i) => i.to_string().into_bytes(),
        Param::Float(f) => f.to_string().into_bytes(),
    }
}

/// Compose a URL path from parts, dropping `None`/empty parts, percent
/// encoding each, and joining with `/`. Never produces `//` and always
/// begins with `/`.
pub fn make_path(parts: &[Option<Param>]) -> String {
    let mut out = String::from("/");
    let mut first = true;
    for part in parts {
        let Some(part) = part else { continue };
        let escaped = escape_param(part);
        if escaped.is_empty() {
            continue;
        }
        if !first {
            out.push('/');
        }
        first = false;
        let text = String::from_utf8_lossy(&escaped);
        out.push_str(&percent_encoding::utf8_percent_encode(&text, PATH_SEGMENT).to_string());
    }
    out
}

/// Encode a request body: bytes pass through unchanged, everything else is
/// JSON-serialized and UTF-8 encoded with lone surrogates replaced rather
/// than rejected.
pub fn encode_body(serializer: &dyn Serializer, body: &BodyInput) -> Result<Vec<u8>> {
    match body {
        BodyInput::Bytes(b) => Ok(b.clone()),
        BodyInput::Value(v) => serializer.dumps(v),
    }
}

/// A request body before encoding: either raw bytes supplied by the caller,
/// or a JSON value to be serialized.
#[derive(Debug, Clone)]
pub enum BodyInput {
    Bytes(Vec<u8>),
    Value(serde_json::Value),
}

/// Serialize a sequence of bulk items, joining with `\n` and always
/// guaranteeing a trailing newline.
pub fn bulk_body(serializer: &dyn Serializer, items: &[serde_json::Value]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for item in items {
        let encoded = serializer.dumps(item)?;
        out.extend_from_slice(&encoded);
        out.push(b'\n');
    }
    Ok(out)
}

/// Build the `Authorization` header value for an `http_auth` or `api_key`
/// credential. Exactly one of the two may be `Some`; callers enforce that
/// via [`crate::config::TransportOptions::validate`].
pub fn auth_header(http_auth: Option<&AuthValue>, api_key: Option<&AuthValue>) -> Result<Option<String>> {
    if http_auth.is_some() && api_key.is_some() {
        return Err(TransportError::ImproperlyConfigured(
            "only one of 'http_auth' and 'api_key' may be passed at a time".to_string(),
        ));
    }
    if let Some(v) = http_auth {
        return Ok(Some(format!("Basic {}", base64_auth(v))));
    }
    if let Some(v) = api_key {
        return Ok(Some(format!("ApiKey {}", base64_auth(v))));
    }
    Ok(None)
}

fn base64_auth(value: &AuthValue) -> String {
    match value {
        AuthValue::Pair(user, pass) => base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", user, pass)),
        AuthValue::Encoded(s) => s.clone(),
    }
}

/// Crate version used in the `es=` token of `x-elastic-client-meta`.
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build the `x-elastic-client-meta` header value: `es=<client>,rust=<lang>,t=<backend>[,dm=<backend-meta>]`.
///
/// `http_client_meta` is the `(tag, version)` pair a Connection implementation
/// reports for its backend, e.g. `("rq", "0.11.2")` for the blocking reqwest
/// backend; `None` when the backend declines to report one.
pub fn client_meta_header(http_client_meta: Option<(&str, &str)>) -> String {
    let rustc = rustc_version_token();
    let mut tokens = vec![
        format!("es={}", version_token(CLIENT_VERSION)),
        format!("rust={}", version_token(&rustc)),
        format!("t={}", version_token(CLIENT_VERSION)),
    ];
    if let Some((tag, version)) = http_client_meta {
        tokens.push(format!("{}={}", tag, version_token(version)));
    }
    tokens.join(",")
}

/// A pre-release suffix (anything after `-`) becomes a trailing `p`,
/// matching the original client's meta-header version formatting.
fn version_token(version: &str) -> String {
    match version.split_once('-') {
        Some((base, _pre)) => format!("{}p", base),
        None => version.to_string(),
    }
}

fn rustc_version_token() -> String {
    env!("CARGO_PKG_RUST_VERSION").to_string()
}

/// Resolve the effective `x-opaque-id`: a per-request header always wins
/// over the transport-level default.
pub fn resolve_opaque_id<'a>(
    default_opaque_id: Option<&'a str>,
    request_header: Option<&'a str>,
) -> Option<&'a str> {
    request_header.or(default_opaque_id)
}

/// Apply the decorator contract: pull recognized parameter names (plus the
/// global set) out of a caller's kwargs-like bag into `params`, leaving
/// everything else untouched. `ignore` and `request_timeout` are pulled out
/// separately and are not escaped.
pub struct ExtractedParams {
    pub params: BTreeMap<String, Vec<u8>>,
    pub ignore: Vec<u16>,
    pub request_timeout: Option<f64>,
    pub remaining: BTreeMap<String, Param>,
}

pub fn extract_recognized_params(
    allowed: &[&str],
    mut kwargs: BTreeMap<String, Param>,
) -> ExtractedParams {
    let mut params = BTreeMap::new();

    for name in allowed.iter().chain(GLOBAL_PARAMS.iter()) {
        if let Some(value) = kwargs.remove(*name) {
            params.insert(name.to_string(), escape_param(&value));
        }
    }

    let ignore = match kwargs.remove("ignore") {
        Some(Param::List(items)) => items
            .into_iter()
            .filter_map(|p| match p {
                Param::Int(i) => Some(i as u16),
                _ => None,
            })
            .collect(),
        Some(Param::Int(i)) => vec![i as u16],
        _ => Vec::new(),
    };

    let request_timeout = match kwargs.remove("request_timeout") {
        Some(Param::Float(f)) => Some(f),
        Some(Param::Int(i)) => Some(i as f64),
        _ => None,
    };

    ExtractedParams {
        params,
        ignore,
        request_timeout,
        remaining: kwargs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::JsonSerializer;
    use serde_json::json;

    #[test]
    fn make_path_never_produces_double_slash() {
        let parts = vec![
            Some(Param::from("users")),
            None,
            Some(Param::from("")),
            Some(Param::from("42")),
        ];
        let path = make_path(&parts);
        assert!(!path.contains("//"));
        assert!(path.starts_with('/'));
        assert_eq!(path, "/users/42");
    }

    #[test]
    fn make_path_preserves_comma_and_star() {
        let parts = vec![Some(Param::List(vec![
            Param::from("idx1"),
            Param::from("idx2"),
        ])), Some(Param::from("*"))];
        assert_eq!(make_path(&parts), "/idx1,idx2/*");
    }

    #[test]
    fn make_path_escapes_reserved_characters() {
        let parts = vec![Some(Param::from("a b/c"))];
        let path = make_path(&parts);
        assert!(!path.contains(' '));
        assert_eq!(path, "/a%20b%2Fc");
    }

    #[test]
    fn escape_param_bool_is_lowercase_string() {
        assert_eq!(escape_param(&Param::Bool(true)), b"true");
        assert_eq!(escape_param(&Param::Bool(false)), b"false");
    }

    #[test]
    fn escape_param_list_comma_joins() {
        let p = Param::List(vec![Param::from("a"), Param::from("b")]);
        assert_eq!(escape_param(&p), b"a,b");
    }

    #[test]
    fn escape_param_bytes_pass_through() {
        let p = Param::Bytes(vec![0xff, 0x00]);
        assert_eq!(escape_param(&p), vec![0xff, 0x00]);
    }

    #[test]
    fn bulk_body_always_ends_with_newline() {
        let s = JsonSerializer;
        let items = vec![json!({"index": {}}), json!({"field": "value"})];
        let body = bulk_body(&s, &items).unwrap();
        assert!(body.ends_with(b"\n"));
        let interior_newlines = body.iter().filter(|&&b| b == b'\n').count();
        assert_eq!(interior_newlines, items.len());
    }

    #[test]
    fn auth_header_basic_from_pair() {
        let auth = AuthValue::Pair("user".into(), "pass".into());
        let header = auth_header(Some(&auth), None).unwrap().unwrap();
        assert!(header.starts_with("Basic "));
        let b64 = header.strip_prefix("Basic ").unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .unwrap();
        assert_eq!(decoded, b"user:pass");
    }

    #[test]
    fn auth_header_api_key_from_pair() {
        let auth = AuthValue::Pair("id".into(), "key".into());
        let header = auth_header(None, Some(&auth)).unwrap().unwrap();
        assert!(header.starts_with("ApiKey "));
    }

    #[test]
    fn auth_header_rejects_both_set() {
        let a = AuthValue::Encoded("x".into());
        let b = AuthValue::Encoded("y".into());
        assert!(auth_header(Some(&a), Some(&b)).is_err());
    }

    #[test]
    fn auth_header_none_when_neither_set() {
        assert!(auth_header(None, None).unwrap().is_none());
    }

    #[test]
    fn client_meta_header_matches_token_shape() {
        let header = client_meta_header(Some(("dm", "1.2.3")));
        let re_like: Vec<&str> = header.split(',').collect();
        assert_eq!(re_like.len(), 4);
        assert!(re_like[0].starts_with("es="));
        assert!(re_like[1].starts_with("rust="));
        assert!(re_like[2].starts_with("t="));
        assert_eq!(re_like[3], "dm=1.2.3");
    }

    #[test]
    fn client_meta_header_omits_backend_token_when_absent() {
        let header = client_meta_header(None);
        assert_eq!(header.split(',').count(), 3);
    }

    #[test]
    fn version_token_marks_prerelease_with_trailing_p() {
        assert_eq!(version_token("1.2.3-alpha"), "1.2.3p");
        assert_eq!(version_token("1.2.3"), "1.2.3");
    }

    #[test]
    fn resolve_opaque_id_prefers_per_request_header() {
        assert_eq!(
            resolve_opaque_id(Some("default"), Some("request")),
            Some("request")
        );
        assert_eq!(resolve_opaque_id(Some("default"), None), Some("default"));
        assert_eq!(resolve_opaque_id(None, None), None);
    }

    #[test]
    fn extract_recognized_params_pulls_allowed_and_global_names() {
        let mut kwargs = BTreeMap::new();
        kwargs.insert("index".to_string(), Param::from("my-index"));
        kwargs.insert("pretty".to_string(), Param::Bool(true));
        kwargs.insert("custom".to_string(), Param::from("stays"));
        kwargs.insert("ignore".to_string(), Param::List(vec![Param::Int(404)]));
        kwargs.insert("request_timeout".to_string(), Param::Float(30.0));

        let extracted = extract_recognized_params(&["index"], kwargs);
        assert_eq!(extracted.params.get("index").unwrap(), b"my-index");
        assert_eq!(extracted.params.get("pretty").unwrap(), b"true");
        assert_eq!(extracted.ignore, vec![404]);
        assert_eq!(extracted.request_timeout, Some(30.0));
        assert!(extracted.remaining.contains_key("custom"));
        assert!(!extracted.remaining.contains_key("index"));
    }
}
