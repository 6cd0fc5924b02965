//! Scriptable connection double used by the transport's own test suite.
//!
//! Mirrors `DummyConnection` from the reference client's test suite: a
//! connection whose behavior for each call is decided in advance rather than
//! by talking to a socket, so retry loops, sniffing, and the product-check
//! handshake can be exercised deterministically and without spinning up a
//! real cluster.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::connection::{ConnectionId, ConnectionLike, RawResponse};
use crate::error::{Result, TransportError};

/// One scripted outcome for a `FakeConnection::perform_request` call.
#[derive(Debug, Clone)]
pub enum FakeResponse {
    /// Succeed with the given status, body, and headers.
    Ok {
        status: u16,
        body: Vec<u8>,
        headers: BTreeMap<String, String>,
    },
    /// Fail the call outright, as if the transport never got a response.
    Fail(FakeFailure),
}

/// The flavor of failure a scripted call raises, matching the exception
/// classes the reference test suite parametrizes over.
#[derive(Debug, Clone)]
pub enum FakeFailure {
    Connection(String),
    ConnectionTimeout,
}

impl FakeResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        let body = body.into().into_bytes();
        let mut headers = BTreeMap::new();
        headers.insert(
            "x-elastic-product".to_string(),
            "Elasticsearch".to_string(),
        );
        FakeResponse::Ok {
            status: 200,
            body,
            headers,
        }
    }

    /// `ok` with no `x-elastic-product` header, for exercising the
    /// unsupported-product check.
    pub fn ok_without_product_header(body: impl Into<String>) -> Self {
        FakeResponse::Ok {
            status: 200,
            body: body.into().into_bytes(),
            headers: BTreeMap::new(),
        }
    }

    pub fn ok_with_product_value(body: impl Into<String>, value: impl Into<String>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("x-elastic-product".to_string(), value.into());
        FakeResponse::Ok {
            status: 200,
            body: body.into().into_bytes(),
            headers,
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        if let FakeResponse::Ok { status: s, .. } = &mut self {
            *s = status;
        }
        self
    }

    pub fn connection_error(message: impl Into<String>) -> Self {
        FakeResponse::Fail(FakeFailure::Connection(message.into()))
    }

    pub fn connection_timeout() -> Self {
        FakeResponse::Fail(FakeFailure::ConnectionTimeout)
    }
}

/// One recorded call, for assertions on what a test's Transport actually
/// sent.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub path: String,
    pub body: Option<Vec<u8>>,
    pub headers: BTreeMap<String, String>,
}

/// A connection whose responses are scripted in advance, one per call, in
/// order. Calls past the end of the script repeat the last entry, matching
/// the reference `DummyConnection`'s behavior of reusing its last exception
/// once exhausted.
#[derive(Debug)]
pub struct FakeConnection {
    id: ConnectionId,
    script: Mutex<Vec<FakeResponse>>,
    cursor: Mutex<usize>,
    calls: Mutex<Vec<RecordedCall>>,
    closed: std::sync::atomic::AtomicBool,
}

impl FakeConnection {
    pub fn new(id: ConnectionId, script: Vec<FakeResponse>) -> Self {
        FakeConnection {
            id,
            script: Mutex::new(script),
            cursor: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl ConnectionLike for FakeConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn host(&self) -> String {
        self.id.origin()
    }

    fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn perform_request(
        &self,
        method: &str,
        path: &str,
        _params: Option<&BTreeMap<String, Vec<u8>>>,
        body: Option<&[u8]>,
        _timeout: Option<Duration>,
        ignore: &[u16],
        headers: Option<&BTreeMap<String, String>>,
    ) -> Result<RawResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: method.to_string(),
            path: path.to_string(),
            body: body.map(|b| b.to_vec()),
            headers: headers.cloned().unwrap_or_default(),
        });

        let script = self.script.lock().unwrap();
        let mut cursor = self.cursor.lock().unwrap();
        let idx = (*cursor).min(script.len().saturating_sub(1));
        if *cursor < script.len() {
            *cursor += 1;
        }
        let entry = script
            .get(idx)
            .cloned()
            .expect("FakeConnection script must not be empty");

        match entry {
            FakeResponse::Ok {
                status,
                body,
                headers,
            } => {
                if status >= 400 && !ignore.contains(&status) {
                    let info = serde_json::from_slice::<serde_json::Value>(&body)
                        .unwrap_or_else(|_| serde_json::json!({}));
                    Err(TransportError::http(
                        status,
                        String::from_utf8_lossy(&body).into_owned(),
                        info,
                    ))
                } else {
                    Ok(RawResponse {
                        status,
                        headers,
                        body,
                    })
                }
            }
            FakeResponse::Fail(FakeFailure::Connection(message)) => {
                Err(TransportError::Connection {
                    message,
                    source_repr: "fake connection failure".to_string(),
                })
            }
            FakeResponse::Fail(FakeFailure::ConnectionTimeout) => {
                Err(TransportError::ConnectionTimeout {
                    source_repr: "fake connection timeout".to_string(),
                })
            }
        }
    }
}

/// Builds a fixed, ordered set of `FakeConnection`s, standing in for
/// `crate::transport::HttpConnectionFactory` in tests.
///
/// One script per connection, consumed in build order -- the seed host a
/// Transport connects to first gets `scripts[0]`, the next gets
/// `scripts[1]`, and so on; the last script is reused once the list is
/// exhausted. [`FakeConnectionFactory::new`] is a convenience for the
/// common single-script case.
#[derive(Debug)]
pub struct FakeConnectionFactory {
    scripts: Mutex<Vec<Vec<FakeResponse>>>,
    built: Mutex<Vec<std::sync::Arc<FakeConnection>>>,
}

impl FakeConnectionFactory {
    /// One script shared by every connection this factory builds.
    pub fn new(script: Vec<FakeResponse>) -> Self {
        FakeConnectionFactory::with_scripts(vec![script])
    }

    /// One script per connection, in build order.
    pub fn with_scripts(scripts: Vec<Vec<FakeResponse>>) -> Self {
        FakeConnectionFactory {
            scripts: Mutex::new(scripts),
            built: Mutex::new(Vec::new()),
        }
    }

    /// All `FakeConnection`s this factory has built so far, in build order.
    pub fn built(&self) -> Vec<std::sync::Arc<FakeConnection>> {
        self.built.lock().unwrap().clone()
    }
}

impl crate::transport::ConnectionFactory for FakeConnectionFactory {
    fn build(
        &self,
        host: &crate::config::HostConfig,
        _options: &crate::config::TransportOptions,
    ) -> Result<std::sync::Arc<dyn ConnectionLike>> {
        let id = ConnectionId::from_host_config(host);
        let scripts = self.scripts.lock().unwrap();
        let built_count = self.built.lock().unwrap().len();
        let idx = built_count.min(scripts.len().saturating_sub(1));
        let script = scripts.get(idx).cloned().unwrap_or_default();
        drop(scripts);
        let conn = std::sync::Arc::new(FakeConnection::new(id, script));
        self.built.lock().unwrap().push(conn.clone());
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(port: u16) -> ConnectionId {
        ConnectionId {
            scheme: "http".to_string(),
            host: "localhost".to_string(),
            port,
            url_prefix: String::new(),
        }
    }

    #[test]
    fn script_entries_are_consumed_in_order() {
        let fake = FakeConnection::new(
            id(9200),
            vec![
                FakeResponse::ok("{\"a\":1}"),
                FakeResponse::ok("{\"a\":2}"),
            ],
        );
        let first = fake
            .perform_request("GET", "/", None, None, None, &[], None)
            .unwrap();
        let second = fake
            .perform_request("GET", "/", None, None, None, &[], None)
            .unwrap();
        assert_eq!(first.body, b"{\"a\":1}");
        assert_eq!(second.body, b"{\"a\":2}");
    }

    #[test]
    fn exhausted_script_repeats_last_entry() {
        let fake = FakeConnection::new(id(9200), vec![FakeResponse::connection_error("boom")]);
        for _ in 0..5 {
            let err = fake
                .perform_request("GET", "/", None, None, None, &[], None)
                .unwrap_err();
            assert!(matches!(err, TransportError::Connection { .. }));
        }
        assert_eq!(fake.call_count(), 5);
    }

    #[test]
    fn records_method_and_path_of_each_call() {
        let fake = FakeConnection::new(id(9200), vec![FakeResponse::ok("{}")]);
        fake.perform_request("PUT", "/idx/_doc/1", None, Some(b"{}"), None, &[], None)
            .unwrap();
        let calls = fake.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "PUT");
        assert_eq!(calls[0].path, "/idx/_doc/1");
    }

    #[test]
    fn status_above_400_raises_http_error_unless_ignored() {
        let fake = FakeConnection::new(id(9200), vec![FakeResponse::ok("{}").status(404)]);
        let err = fake
            .perform_request("GET", "/missing", None, None, None, &[], None)
            .unwrap_err();
        assert!(matches!(err, TransportError::Http { status: 404, .. }));

        let fake = FakeConnection::new(id(9200), vec![FakeResponse::ok("{}").status(404)]);
        let ok = fake
            .perform_request("GET", "/missing", None, None, None, &[404], None)
            .unwrap();
        assert_eq!(ok.status, 404);
    }
}
