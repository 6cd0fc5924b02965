//! es-transport - the Transport layer of an Elasticsearch client.
//!
//! This crate turns a logical request (method, path, query parameters,
//! body) into a physical HTTP call against one of several cluster nodes,
//! with retry, dead-node quarantine, cluster topology discovery
//! ("sniffing"), and a one-shot product-identity verification handshake.
//!
//! # Architecture
//!
//! - `serializer`: encode request bodies, decode response bodies.
//! - `connection`: one HTTP endpoint; a single blocking round-trip.
//! - `pool`: round-robin live set with dead-connection quarantine.
//! - `host_info`: sniff-node admission policy.
//! - `shaping`: path/param escaping, body encoding, auth and meta headers.
//! - `config`: constructor options and host descriptor normalization.
//! - `transport`: the orchestrator tying all of the above together.
//! - `namespace`: borrowed-reference sub-client composition.
//! - `error`: the crate's error sum type.
//! - `test_support`: scriptable `FakeConnection` used by this crate's own
//!   tests and available to integration tests under `tests/`.
//!
//! # Example
//!
//! ```no_run
//! use es_transport::{HostConfig, Transport, TransportOptions};
//!
//! fn main() -> es_transport::Result<()> {
//!     let transport = Transport::new(TransportOptions {
//!         hosts: vec![HostConfig {
//!             host: Some("localhost".to_string()),
//!             port: Some(9200),
//!             ..Default::default()
//!         }.into()],
//!         ..Default::default()
//!     })?;
//!     let _ = transport.perform_request("GET", "/", None, None, None)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod host_info;
pub mod namespace;
pub mod pool;
pub mod serializer;
pub mod shaping;
pub mod test_support;
pub mod transport;

pub use config::{AuthValue, HostConfig, HostEntry, SendGetBodyAs, TransportOptions};
pub use connection::{Connection, ConnectionId, ConnectionLike, RawResponse};
pub use error::{HttpKind, Result, TransportError};
pub use host_info::{DefaultHostInfoCallback, HostInfoCallback, NodeInfo};
pub use namespace::{ClusterNamespace, NamespacedClient};
pub use pool::{ConnectionPool, DummyConnectionPool, RoundRobinConnectionPool};
pub use serializer::{Decoded, JsonSerializer, Serializer};
pub use shaping::{BodyInput, Param};
pub use transport::{ConnectionFactory, HttpConnectionFactory, Transport};
