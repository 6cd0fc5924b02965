//! The orchestrator: owns the connection pool, the retry loop, the sniffing
//! schedule, and the one-shot product-verification gate.
//!
//! Everything else in this crate (Connection, ConnectionPool, RequestShaper,
//! Serializer) is a collaborator the Transport drives. `perform_request` is
//! the one operation a generated per-API wrapper (out of scope here) would
//! call.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::{decode_cloud_id, normalize_hosts, HostConfig, HostEntry, SendGetBodyAs, TransportOptions};
use crate::connection::{Connection, ConnectionId, ConnectionLike, RawResponse, HTTP_CLIENT_META};
use crate::error::{Result, TransportError};
use crate::host_info::{DefaultHostInfoCallback, HostInfoCallback, NodeInfo};
use crate::pool::{ConnectionPool, DummyConnectionPool, RoundRobinConnectionPool};
use crate::serializer::{Decoded, JsonSerializer, Serializer};
use crate::shaping::{client_meta_header, encode_body, resolve_opaque_id, BodyInput};

const VERIFIED_UNKNOWN: u8 = 0;
const VERIFIED_OK: u8 = 1;
const VERIFIED_FAILED: u8 = 2;

/// Produces a [`ConnectionLike`] for a host descriptor. The only production
/// implementation is [`HttpConnectionFactory`]; tests substitute
/// `crate::test_support::FakeConnectionFactory`.
pub trait ConnectionFactory: std::fmt::Debug + Send + Sync {
    fn build(&self, host: &HostConfig, options: &TransportOptions) -> Result<Arc<dyn ConnectionLike>>;
}

/// Builds real, reqwest-backed [`Connection`]s.
#[derive(Debug, Default)]
pub struct HttpConnectionFactory;

impl<T: ConnectionFactory + ?Sized> ConnectionFactory for Arc<T> {
    fn build(&self, host: &HostConfig, options: &TransportOptions) -> Result<Arc<dyn ConnectionLike>> {
        (**self).build(host, options)
    }
}

impl ConnectionFactory for HttpConnectionFactory {
    fn build(&self, host: &HostConfig, options: &TransportOptions) -> Result<Arc<dyn ConnectionLike>> {
        let auth = host.http_auth.as_ref().or(options.http_auth.as_ref());
        let conn = Connection::new(
            host,
            auth,
            options.api_key.as_ref(),
            options.http_compress,
            options.request_timeout_duration(),
        )?;
        Ok(Arc::new(conn))
    }
}

/// The Transport layer. Cheap to share: clone an `Arc<Transport>` across
/// threads, or hand out borrowed references to namespaced sub-clients (see
/// [`crate::namespace`]).
pub struct Transport {
    factory: Arc<dyn ConnectionFactory>,
    options: TransportOptions,
    serializer: JsonSerializer,
    host_info_callback: Arc<dyn HostInfoCallback>,
    seed_connections: Mutex<Vec<Arc<dyn ConnectionLike>>>,
    pool: Mutex<Arc<dyn ConnectionPool>>,
    last_sniff: Mutex<Instant>,
    sniffing: AtomicBool,
    verified: AtomicU8,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Build a Transport talking over real HTTP.
    pub fn new(options: TransportOptions) -> Result<Self> {
        Self::with_connection_factory(options, HttpConnectionFactory)
    }

    /// Build a Transport using a caller-supplied [`ConnectionFactory`] --
    /// the seam tests use to substitute `FakeConnection`.
    pub fn with_connection_factory(
        mut options: TransportOptions,
        factory: impl ConnectionFactory + 'static,
    ) -> Result<Self> {
        options.validate()?;

        let seed_hosts: Vec<HostConfig> = if let Some(cloud_id) = options.cloud_id.clone() {
            let host = decode_cloud_id(&cloud_id)?;
            options.sniff_on_start = false;
            options.sniff_on_connection_fail = false;
            vec![host]
        } else {
            normalize_hosts(&options.hosts)?
        };

        let factory: Arc<dyn ConnectionFactory> = Arc::new(factory);
        let connections: Vec<Arc<dyn ConnectionLike>> = seed_hosts
            .iter()
            .map(|h| factory.build(h, &options))
            .collect::<Result<Vec<_>>>()?;

        let dead_timeout = Duration::from_secs_f64(options.dead_timeout);
        let pool = build_pool(connections.clone(), dead_timeout, options.randomize_hosts);
        let sniff_on_start = options.sniff_on_start;

        let transport = Transport {
            factory,
            host_info_callback: Arc::new(DefaultHostInfoCallback),
            serializer: JsonSerializer,
            seed_connections: Mutex::new(connections),
            pool: Mutex::new(pool),
            last_sniff: Mutex::new(Instant::now()),
            sniffing: AtomicBool::new(false),
            verified: AtomicU8::new(VERIFIED_UNKNOWN),
            options,
        };

        if sniff_on_start {
            transport.sniff_hosts(true)?;
        }

        Ok(transport)
    }

    /// `GET`/`POST`/... a path. This is the contract every per-API wrapper
    /// (out of scope here) ultimately calls.
    pub fn perform_request(
        &self,
        method: &str,
        path: &str,
        params: Option<BTreeMap<String, Vec<u8>>>,
        body: Option<BodyInput>,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Decoded> {
        self.perform_request_ignoring(method, path, params, body, headers, &[])
    }

    /// `perform_request`, with a set of HTTP statuses that must not raise.
    pub fn perform_request_ignoring(
        &self,
        method: &str,
        path: &str,
        params: Option<BTreeMap<String, Vec<u8>>>,
        body: Option<BodyInput>,
        headers: Option<BTreeMap<String, String>>,
        ignore: &[u16],
    ) -> Result<Decoded> {
        let mut method = method.to_ascii_uppercase();
        let mut params = params.unwrap_or_default();
        let mut body = body;

        if body.is_some() && method == "GET" {
            match self.options.send_get_body_as {
                SendGetBodyAs::Get => {}
                SendGetBodyAs::Post => method = "POST".to_string(),
                SendGetBodyAs::Source => {
                    let encoded = encode_body(&self.serializer, body.as_ref().unwrap())?;
                    params.insert("source".to_string(), encoded);
                    body = None;
                }
            }
        }

        let encoded_body = match &body {
            Some(b) => Some(encode_body(&self.serializer, b)?),
            None => None,
        };

        let mut effective_headers = headers.unwrap_or_default();
        if self.options.meta_header
            && !effective_headers
                .keys()
                .any(|k| k.eq_ignore_ascii_case("x-elastic-client-meta"))
        {
            effective_headers.insert(
                "x-elastic-client-meta".to_string(),
                client_meta_header(Some(HTTP_CLIENT_META)),
            );
        }
        let existing_opaque_key = effective_headers
            .keys()
            .find(|k| k.eq_ignore_ascii_case("x-opaque-id"))
            .cloned();
        let per_request_opaque_id = existing_opaque_key
            .as_ref()
            .and_then(|k| effective_headers.get(k))
            .cloned();
        let resolved_opaque_id = resolve_opaque_id(
            self.options.opaque_id.as_deref(),
            per_request_opaque_id.as_deref(),
        )
        .map(|s| s.to_string());
        if let Some(opaque) = resolved_opaque_id {
            if let Some(key) = existing_opaque_key {
                effective_headers.remove(&key);
            }
            effective_headers.insert("x-opaque-id".to_string(), opaque);
        }

        let params_ref = if params.is_empty() { None } else { Some(&params) };
        let mut last_err: Option<TransportError> = None;
        let attempts = self.options.max_retries as usize + 1;

        for _ in 0..attempts {
            self.maybe_sniff();

            let pool = self.pool_ref();
            let conn = pool.get_connection();

            let outcome = conn.perform_request(
                &method,
                path,
                params_ref,
                encoded_body.as_deref(),
                self.options.request_timeout_duration(),
                ignore,
                Some(&effective_headers),
            );

            match outcome {
                Ok(response) => {
                    pool.mark_live(&conn);
                    self.check_product(&response)?;
                    let content_type = response
                        .headers
                        .get("content-type")
                        .cloned()
                        .unwrap_or_else(|| "application/json".to_string());
                    return self.serializer.loads(&response.body, &content_type);
                }
                Err(TransportError::ConnectionTimeout { source_repr }) => {
                    pool.mark_dead(&conn);
                    let err = TransportError::ConnectionTimeout { source_repr };
                    if !self.options.retry_on_timeout {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
                Err(TransportError::Connection {
                    message,
                    source_repr,
                }) => {
                    pool.mark_dead(&conn);
                    if self.options.sniff_on_connection_fail {
                        let _ = self.sniff_hosts(false);
                    }
                    last_err = Some(TransportError::Connection {
                        message,
                        source_repr,
                    });
                }
                Err(TransportError::Http { status, error, info })
                    if self.options.retry_on_status.contains(&status) =>
                {
                    pool.mark_dead(&conn);
                    last_err = Some(TransportError::Http { status, error, info });
                }
                Err(other) => return Err(other),
            }
        }

        Err(last_err.expect("retry loop always records an error before exhausting attempts"))
    }

    /// Query every seed connection for `/_nodes/_all/http` and rebuild the
    /// pool from the admitted node list. `initial` forces `timeout=None`
    /// regardless of `sniff_timeout`, matching the construction-time sniff.
    ///
    /// At most one sniff runs at a time; a concurrent caller that finds one
    /// already in flight returns immediately without waiting for it.
    pub fn sniff_hosts(&self, initial: bool) -> Result<()> {
        if self
            .sniffing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("sniff already in flight, skipping");
            return Ok(());
        }
        tracing::debug!(initial, "sniff starting");
        let result = self.sniff_hosts_inner(initial);
        match &result {
            Ok(()) => tracing::info!("sniff completed"),
            Err(e) => tracing::warn!(error = %e, "sniff failed"),
        }
        *self.last_sniff.lock().unwrap() = Instant::now();
        self.sniffing.store(false, Ordering::SeqCst);
        result
    }

    fn sniff_hosts_inner(&self, initial: bool) -> Result<()> {
        let seeds = self.seed_connections.lock().unwrap().clone();
        let timeout = if initial {
            None
        } else {
            self.options.sniff_timeout_duration()
        };

        let mut last_err = None;
        let mut parsed = None;
        for seed in &seeds {
            match seed.perform_request("GET", "/_nodes/_all/http", None, None, timeout, &[], None) {
                Ok(response) => match self.serializer.loads(&response.body, "application/json") {
                    Ok(Decoded::Json(value)) => {
                        parsed = Some(value);
                        break;
                    }
                    Ok(Decoded::Raw(_)) => continue,
                    Err(e) => last_err = Some(e),
                },
                Err(e) => last_err = Some(e),
            }
        }

        let value = match parsed {
            Some(v) => v,
            None => {
                return Err(last_err.unwrap_or_else(|| TransportError::Connection {
                    message: "sniff failed: no seed connection returned a node list".to_string(),
                    source_repr: "no reachable seed".to_string(),
                }))
            }
        };

        let nodes = value
            .get("nodes")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let mut known: HashMap<ConnectionId, Arc<dyn ConnectionLike>> = HashMap::new();
        for c in self.pool_ref().connections() {
            known.insert(c.id().clone(), c);
        }
        for c in &seeds {
            known.entry(c.id().clone()).or_insert_with(|| c.clone());
        }

        let mut admitted = Vec::new();
        for (seq, (_node_id, node)) in nodes.iter().enumerate() {
            let roles = node
                .get("roles")
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            let publish_address = node
                .get("http")
                .and_then(|h| h.get("publish_address"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let info = NodeInfo {
                roles,
                publish_address,
            };
            let Some(host) = self.host_info_callback.admit(&info, seq) else {
                continue;
            };
            let id = ConnectionId::from_host_config(&host);
            let conn = match known.get(&id) {
                Some(c) => c.clone(),
                None => self.factory.build(&host, &self.options)?,
            };
            admitted.push(conn);
        }

        if admitted.is_empty() {
            tracing::debug!("sniff admitted no nodes, keeping current pool");
            return Ok(());
        }

        tracing::info!(admitted = admitted.len(), "sniff rebuilding connection pool");
        let dead_timeout = Duration::from_secs_f64(self.options.dead_timeout);
        let pool = build_pool(admitted, dead_timeout, self.options.randomize_hosts);
        *self.pool.lock().unwrap() = pool;
        Ok(())
    }

    /// Add one more connection to the live pool without a full sniff.
    pub fn add_connection(&self, host: HostConfig) -> Result<()> {
        let conn = self.factory.build(&host, &self.options)?;
        self.seed_connections.lock().unwrap().push(conn.clone());

        let mut connections = self.pool_ref().connections();
        connections.push(conn);
        let dead_timeout = Duration::from_secs_f64(self.options.dead_timeout);
        let pool = build_pool(connections, dead_timeout, false);
        *self.pool.lock().unwrap() = pool;
        Ok(())
    }

    /// Current live connections, in round-robin order.
    pub fn connections(&self) -> Vec<Arc<dyn ConnectionLike>> {
        self.pool_ref().connections()
    }

    fn pool_ref(&self) -> Arc<dyn ConnectionPool> {
        Arc::clone(&self.pool.lock().unwrap())
    }

    fn maybe_sniff(&self) {
        let Some(interval) = self.options.sniffer_timeout_duration() else {
            return;
        };
        let elapsed = self.last_sniff.lock().unwrap().elapsed();
        if elapsed >= interval {
            let _ = self.sniff_hosts(false);
        }
    }

    /// Check the `x-elastic-product` header on a successful response,
    /// latching `verified_elasticsearch` on the first observation and
    /// skipping the check forever after.
    fn check_product(&self, response: &RawResponse) -> Result<()> {
        match self.verified.load(Ordering::SeqCst) {
            VERIFIED_OK => Ok(()),
            VERIFIED_FAILED => Err(TransportError::UnsupportedProduct),
            _ => {
                if response.headers.get("x-elastic-product").map(String::as_str) == Some("Elasticsearch") {
                    let _ = self.verified.compare_exchange(
                        VERIFIED_UNKNOWN,
                        VERIFIED_OK,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    );
                    Ok(())
                } else {
                    let _ = self.verified.compare_exchange(
                        VERIFIED_UNKNOWN,
                        VERIFIED_FAILED,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    );
                    Err(TransportError::UnsupportedProduct)
                }
            }
        }
    }
}

impl Drop for Transport {
    /// Transport teardown closes all pool and seed connections.
    fn drop(&mut self) {
        tracing::info!("tearing down transport");
        self.pool_ref().close();
        for c in self.seed_connections.lock().unwrap().iter() {
            c.close();
        }
    }
}

fn build_pool(
    connections: Vec<Arc<dyn ConnectionLike>>,
    dead_timeout: Duration,
    randomize: bool,
) -> Arc<dyn ConnectionPool> {
    if connections.len() == 1 {
        Arc::new(DummyConnectionPool::new(connections.into_iter().next().unwrap()))
    } else {
        Arc::new(RoundRobinConnectionPool::new(connections, dead_timeout, randomize))
    }
}
