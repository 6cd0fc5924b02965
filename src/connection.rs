//! A single HTTP endpoint.
//!
//! `Connection` owns one `reqwest::blocking::Client` and an immutable base
//! URL. Its I/O is synchronous: `perform_request` blocks the calling thread
//! for the duration of the round trip, matching the Transport's concurrency
//! model (no event loop; any number of threads call in concurrently, each
//! paying for its own HTTP wait).

use std::collections::BTreeMap;
use std::error::Error as _;
use std::io::Write;
use std::time::{Duration, Instant};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::{AuthValue, HostConfig};
use crate::error::{Result, TransportError};
use crate::shaping::auth_header;

/// `(tag, version)` identifying the HTTP backend this Connection uses, for
/// inclusion in `x-elastic-client-meta` as `dm=<version>` (or whatever tag
/// the backend reports). Backends that don't want to report one (e.g. a
/// fake test Connection) return `None`.
pub const HTTP_CLIENT_META: (&str, &str) = ("rq", "0.11");

/// Identity of a Connection: scheme, host, port, url_prefix. Two
/// connections with the same identity are the same node as far as the pool
/// and the sniffer are concerned, regardless of any other configured
/// option.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub url_prefix: String,
}

impl ConnectionId {
    pub fn from_host_config(host: &HostConfig) -> Self {
        ConnectionId {
            scheme: host.scheme().to_string(),
            host: host.effective_host().to_string(),
            port: host.effective_port(),
            url_prefix: host.url_prefix.clone().unwrap_or_default(),
        }
    }

    /// `scheme://host:port` with no path, used as the base the rest of a
    /// request URL is appended to.
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// One HTTP endpoint. Equality and hashing are by [`ConnectionId`] only, so
/// the pool and sniffer can recognize a freshly-sniffed node as one already
/// present.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    client: reqwest::blocking::Client,
    default_headers: BTreeMap<String, String>,
    http_compress: bool,
    default_timeout: Option<Duration>,
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Connection {}

impl std::hash::Hash for Connection {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A decoded HTTP response, as returned by [`Connection::perform_request`].
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// Capability the Transport consumes instead of depending on the concrete
/// `reqwest`-backed [`Connection`] directly. This is the seam tests use to
/// script node behavior (exceptions, canned responses) without a live
/// cluster -- see `test_support::FakeConnection`.
#[allow(clippy::too_many_arguments)]
pub trait ConnectionLike: std::fmt::Debug + Send + Sync {
    fn id(&self) -> &ConnectionId;

    fn host(&self) -> String;

    fn perform_request(
        &self,
        method: &str,
        path: &str,
        params: Option<&BTreeMap<String, Vec<u8>>>,
        body: Option<&[u8]>,
        timeout: Option<Duration>,
        ignore: &[u16],
        headers: Option<&BTreeMap<String, String>>,
    ) -> Result<RawResponse>;

    /// Release any resources this connection holds. `reqwest::blocking`
    /// has no explicit socket-close call -- its pooled sockets drop with
    /// the client -- so the default implementation only logs; a backend
    /// that owns something closeable (a test double, a future non-HTTP
    /// transport) overrides it.
    fn close(&self) {
        tracing::debug!(connection = %self.host(), "closing connection");
    }
}

impl Connection {
    /// Build a Connection for `host`. `host_auth` is the credential to use
    /// for this specific connection: the host descriptor's own `http_auth`
    /// if set, otherwise the Transport-wide `http_auth`/`api_key`.
    pub fn new(
        host: &HostConfig,
        host_auth: Option<&AuthValue>,
        api_key: Option<&AuthValue>,
        http_compress: bool,
        default_timeout: Option<Duration>,
    ) -> Result<Self> {
        let id = ConnectionId::from_host_config(host);

        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| {
                TransportError::ImproperlyConfigured(format!(
                    "failed to build HTTP client: {}",
                    e
                ))
            })?;

        let mut default_headers = BTreeMap::new();
        default_headers.insert(
            "user-agent".to_string(),
            format!("es-transport-rust/{}", env!("CARGO_PKG_VERSION")),
        );
        if let Some(value) = auth_header(host_auth, api_key)? {
            default_headers.insert("authorization".to_string(), value);
        }
        if http_compress {
            default_headers.insert(
                "accept-encoding".to_string(),
                "gzip,deflate".to_string(),
            );
        }

        Ok(Connection {
            id,
            client,
            default_headers,
            http_compress,
            default_timeout,
        })
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// `scheme://host:port` for this connection, with no path.
    pub fn host(&self) -> String {
        self.id.origin()
    }

    /// Perform exactly one HTTP round trip.
    ///
    /// `params` is a pre-escaped query-string map (see
    /// [`crate::shaping::escape_param`]); this function is responsible for
    /// percent-encoding it into the final URL, since the shaper only
    /// type-coerces values to bytes. `headers` is merged over the
    /// connection's defaults with per-request headers winning, compared
    /// case-insensitively.
    #[allow(clippy::too_many_arguments)]
    pub fn perform_request(
        &self,
        method: &str,
        path: &str,
        params: Option<&BTreeMap<String, Vec<u8>>>,
        body: Option<&[u8]>,
        timeout: Option<Duration>,
        ignore: &[u16],
        headers: Option<&BTreeMap<String, String>>,
    ) -> Result<RawResponse> {
        let url = self.build_url(path, params);

        let mut header_map: BTreeMap<String, String> = self.default_headers.clone();
        if body.is_some() && !header_map.contains_key("content-type") {
            header_map.insert("content-type".to_string(), "application/json".to_string());
        }
        if let Some(overrides) = headers {
            for (k, v) in overrides {
                header_map.insert(k.to_ascii_lowercase(), v.clone());
            }
        }

        let effective_body = if self.http_compress {
            body.map(gzip_compress).transpose()?
        } else {
            body.map(|b| b.to_vec())
        };
        if effective_body.is_some() && self.http_compress {
            header_map.insert("content-encoding".to_string(), "gzip".to_string());
        }

        let method = reqwest::Method::from_bytes(method.as_bytes()).map_err(|e| {
            TransportError::ImproperlyConfigured(format!("invalid HTTP method: {}", e))
        })?;
        let mut request = self.client.request(method.clone(), &url);
        for (k, v) in &header_map {
            request = request.header(k.as_str(), v.as_str());
        }
        if let Some(b) = effective_body {
            request = request.body(b);
        }
        let effective_timeout = timeout.or(self.default_timeout);
        if let Some(t) = effective_timeout {
            request = request.timeout(t);
        }

        let start = Instant::now();
        let response = request.send().map_err(map_request_error)?;
        let elapsed = start.elapsed();

        let status = response.status().as_u16();
        let response_headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_ascii_lowercase(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body_bytes = response.bytes().map_err(map_request_error)?.to_vec();

        tracing::debug!(
            method = %method,
            url = %url,
            status = status,
            elapsed_s = format!("{:.3}", elapsed.as_secs_f64()),
            "> {}\n< {}",
            body.map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_else(|| "None".to_string()),
            String::from_utf8_lossy(&body_bytes),
        );

        if status >= 400 && !ignore.contains(&status) {
            let info = serde_json::from_slice::<serde_json::Value>(&body_bytes)
                .unwrap_or_else(|_| serde_json::json!({"error": String::from_utf8_lossy(&body_bytes)}));
            return Err(TransportError::http(
                status,
                String::from_utf8_lossy(&body_bytes).into_owned(),
                info,
            ));
        }

        Ok(RawResponse {
            status,
            headers: response_headers,
            body: body_bytes,
        })
    }

    fn build_url(&self, path: &str, params: Option<&BTreeMap<String, Vec<u8>>>) -> String {
        let mut url = format!("{}{}{}", self.id.origin(), self.id.url_prefix, path);
        if let Some(params) = params {
            if !params.is_empty() {
                let mut serializer = url::form_urlencoded::Serializer::new(String::new());
                for (k, v) in params {
                    serializer.append_pair(k, &String::from_utf8_lossy(v));
                }
                url.push('?');
                url.push_str(&serializer.finish());
            }
        }
        url
    }
}

impl ConnectionLike for Connection {
    fn id(&self) -> &ConnectionId {
        Connection::id(self)
    }

    fn host(&self) -> String {
        Connection::host(self)
    }

    fn perform_request(
        &self,
        method: &str,
        path: &str,
        params: Option<&BTreeMap<String, Vec<u8>>>,
        body: Option<&[u8]>,
        timeout: Option<Duration>,
        ignore: &[u16],
        headers: Option<&BTreeMap<String, String>>,
    ) -> Result<RawResponse> {
        Connection::perform_request(self, method, path, params, body, timeout, ignore, headers)
    }
}

fn gzip_compress(body: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body).map_err(|e| {
        TransportError::Connection {
            message: "failed to gzip-compress request body".to_string(),
            source_repr: e.to_string(),
        }
    })?;
    encoder.finish().map_err(|e| TransportError::Connection {
        message: "failed to gzip-compress request body".to_string(),
        source_repr: e.to_string(),
    })
}

fn map_request_error(source: reqwest::Error) -> TransportError {
    if source.is_timeout() {
        TransportError::connection_timeout(&source)
    } else if is_ssl_error(&source) {
        TransportError::ssl("TLS handshake or certificate validation failed", &source)
    } else {
        TransportError::connection("request failed", &source)
    }
}

fn is_ssl_error(source: &reqwest::Error) -> bool {
    let mut cause: Option<&(dyn std::error::Error + 'static)> = source.source();
    while let Some(err) = cause {
        let text = err.to_string().to_ascii_lowercase();
        if text.contains("certificate") || text.contains("tls") || text.contains("ssl") {
            return true;
        }
        cause = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(port: u16) -> HostConfig {
        HostConfig {
            host: Some("localhost".to_string()),
            port: Some(port),
            ..Default::default()
        }
    }

    #[test]
    fn identity_ignores_unrelated_fields() {
        let a = Connection::new(&host(9200), None, None, false, None).unwrap();
        let b = Connection::new(&host(9200), None, None, true, None).unwrap();
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn identity_differs_by_port() {
        let a = Connection::new(&host(9200), None, None, false, None).unwrap();
        let b = Connection::new(&host(9201), None, None, false, None).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn build_url_has_no_query_when_params_empty() {
        let c = Connection::new(&host(9200), None, None, false, None).unwrap();
        let url = c.build_url("/foo", None);
        assert_eq!(url, "http://localhost:9200/foo");
    }

    #[test]
    fn build_url_percent_encodes_query_params() {
        let c = Connection::new(&host(9200), None, None, false, None).unwrap();
        let mut params = BTreeMap::new();
        params.insert("q".to_string(), b"a b".to_vec());
        let url = c.build_url("/foo", Some(&params));
        assert_eq!(url, "http://localhost:9200/foo?q=a+b");
    }

    #[test]
    fn default_headers_include_basic_auth_when_configured() {
        let auth = AuthValue::Pair("user".into(), "pass".into());
        let c = Connection::new(&host(9200), Some(&auth), None, false, None).unwrap();
        assert!(c
            .default_headers
            .get("authorization")
            .unwrap()
            .starts_with("Basic "));
    }
}
