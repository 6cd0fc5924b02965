//! Error types for the Transport layer.
//!
//! Mirrors the exception hierarchy of a classic Elasticsearch-style client
//! as a single sum type with a kind discriminator instead of a class
//! hierarchy. `TransportError::kind()` gives callers the equivalent of
//! `except NotFoundError` without multiple inheritance.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TransportError>;

/// The HTTP-status-derived subkind of a [`TransportError::Http`] error.
///
/// Computed from the response status code; see [`HttpKind::from_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpKind {
    /// 400
    RequestError,
    /// 401
    AuthenticationException,
    /// 403
    AuthorizationException,
    /// 404
    NotFoundError,
    /// 409
    ConflictError,
    /// Any other status >= 400.
    Other,
}

impl HttpKind {
    /// Classify an HTTP status code into the matching error subkind.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => HttpKind::RequestError,
            401 => HttpKind::AuthenticationException,
            403 => HttpKind::AuthorizationException,
            404 => HttpKind::NotFoundError,
            409 => HttpKind::ConflictError,
            _ => HttpKind::Other,
        }
    }

    fn name(self) -> &'static str {
        match self {
            HttpKind::RequestError => "RequestError",
            HttpKind::AuthenticationException => "AuthenticationException",
            HttpKind::AuthorizationException => "AuthorizationException",
            HttpKind::NotFoundError => "NotFoundError",
            HttpKind::ConflictError => "ConflictError",
            HttpKind::Other => "TransportError",
        }
    }
}

/// Errors raised by the Transport, Connection, ConnectionPool, and
/// RequestShaper.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Construction-time invalid or conflicting configuration. Never raised
    /// from `perform_request`.
    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),

    /// A request body could not be serialized, or a response body could not
    /// be decoded by the selected `Serializer`.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Low-level I/O failure talking to a node. There is no HTTP status for
    /// this case -- the original taxonomy spells that `"N/A"`.
    #[error("ConnectionError({message}) caused by: {source_repr}")]
    Connection {
        message: String,
        source_repr: String,
    },

    /// A request timed out.
    #[error("ConnectionTimeout caused by - {source_repr}")]
    ConnectionTimeout { source_repr: String },

    /// A TLS handshake or certificate failure.
    #[error("SSLError({message}) caused by: {source_repr}")]
    Ssl {
        message: String,
        source_repr: String,
    },

    /// HTTP status >= 400, not in the caller's `ignore` set.
    #[error("{}", format_http(*status, error, info))]
    Http {
        status: u16,
        error: String,
        info: serde_json::Value,
    },

    /// The server's `x-elastic-product` header was missing or did not read
    /// `Elasticsearch`.
    #[error(
        "The client noticed that the server is not Elasticsearch and we do not support this unknown product"
    )]
    UnsupportedProduct,
}

impl TransportError {
    /// HTTP status code of the response that precipitated the error, or
    /// `None` for connection-level failures.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The [`HttpKind`] subkind, for `Http` errors only.
    pub fn kind(&self) -> Option<HttpKind> {
        match self {
            TransportError::Http { status, .. } => Some(HttpKind::from_status(*status)),
            _ => None,
        }
    }

    /// True if this error's status is in the caller-configured
    /// `retry_on_status` set. Non-`Http` errors are never retryable by this
    /// rule (they have their own retry conditions in the Transport).
    pub fn is_retryable_status(&self, retry_on_status: &[u16]) -> bool {
        matches!(self, TransportError::Http { status, .. } if retry_on_status.contains(status))
    }

    pub(crate) fn connection(message: impl Into<String>, source: &reqwest::Error) -> Self {
        TransportError::Connection {
            message: message.into(),
            source_repr: format!("{}({})", source_class(source), source),
        }
    }

    pub(crate) fn connection_timeout(source: &reqwest::Error) -> Self {
        TransportError::ConnectionTimeout {
            source_repr: format!("{}({})", source_class(source), source),
        }
    }

    pub(crate) fn ssl(message: impl Into<String>, source: &reqwest::Error) -> Self {
        TransportError::Ssl {
            message: message.into(),
            source_repr: format!("{}({})", source_class(source), source),
        }
    }

    pub(crate) fn http(status: u16, error: impl Into<String>, info: serde_json::Value) -> Self {
        TransportError::Http {
            status,
            error: error.into(),
            info,
        }
    }
}

/// A short, human-facing tag for the kind of `reqwest::Error` underlying a
/// connection failure, standing in for the original taxonomy's practice of
/// naming the underlying exception class.
fn source_class(source: &reqwest::Error) -> &'static str {
    if source.is_timeout() {
        "Timeout"
    } else if source.is_connect() {
        "ConnectError"
    } else if source.is_decode() {
        "DecodeError"
    } else if source.is_body() {
        "BodyError"
    } else {
        "RequestError"
    }
}

/// Reconstructs the `"<KindName>(<status>, <repr(error)>, <cause>)"`
/// formatting rule for HTTP-status errors.
fn format_http(status: u16, error: &str, info: &serde_json::Value) -> String {
    let kind = HttpKind::from_status(status).name();
    let cause = extract_cause(info);
    let parts: Vec<String> = [
        Some(status.to_string()),
        Some(format!("{:?}", error)),
        cause,
    ]
    .into_iter()
    .flatten()
    .collect();
    format!("{}({})", kind, parts.join(", "))
}

/// Pulls `error.root_cause[0].reason` (plus optional `resource.id` /
/// `resource.type`) out of an Elasticsearch error body, comma-joined. Falls
/// back to the raw `error` value's repr when the shape doesn't match.
fn extract_cause(info: &serde_json::Value) -> Option<String> {
    let error = info.get("error")?;
    if let Some(root_cause) = error.get("root_cause").and_then(|v| v.as_array()) {
        let first = root_cause.first()?;
        let reason = first.get("reason").and_then(|v| v.as_str())?;
        let mut parts = vec![format!("{:?}", reason)];
        if let Some(id) = first.get("resource.id").and_then(|v| v.as_str()) {
            parts.push(id.to_string());
        }
        if let Some(ty) = first.get("resource.type").and_then(|v| v.as_str()) {
            parts.push(ty.to_string());
        }
        Some(parts.join(", "))
    } else {
        Some(format!("{:?}", error))
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Serialization(err.to_string())
    }
}
