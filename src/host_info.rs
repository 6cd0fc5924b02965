//! Sniff-node admission filter.
//!
//! `HostInfoCallback` decides, for each node returned by
//! `GET /_nodes/_all/http`, whether it should be admitted into the
//! connection pool. The default policy skips master-only nodes so the
//! client never sends data traffic to a node that exists purely for cluster
//! coordination.

use crate::config::HostConfig;

/// One node entry from the `/_nodes/_all/http` response, already picked
/// apart from the raw JSON by the sniffer.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    /// `roles` array, e.g. `["master", "data", "ingest"]`.
    pub roles: Vec<String>,
    /// `http.publish_address`, e.g. `"1.1.1.1:123"` or
    /// `"somehost.tld/1.1.1.1:123"`.
    pub publish_address: Option<String>,
}

/// A pure function deciding whether a sniffed node is admitted, and if so,
/// which [`HostConfig`] to connect to it with.
///
/// `seq` is the node's position in the sniff response, passed through in
/// case a custom callback wants deterministic tie-breaking; the default
/// callback ignores it.
pub trait HostInfoCallback: std::fmt::Debug + Send + Sync {
    fn admit(&self, node: &NodeInfo, seq: usize) -> Option<HostConfig>;
}

/// The default admission policy: reject nodes whose `roles` is exactly
/// `["master"]`; otherwise parse `publish_address` into a host/port pair.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHostInfoCallback;

impl HostInfoCallback for DefaultHostInfoCallback {
    fn admit(&self, node: &NodeInfo, _seq: usize) -> Option<HostConfig> {
        if node.roles == ["master"] {
            return None;
        }
        let address = node.publish_address.as_deref()?;
        let (host, port) = parse_publish_address(address)?;
        Some(HostConfig {
            host: Some(host),
            port: Some(port),
            ..Default::default()
        })
    }
}

/// Parse a publish address in either `"1.1.1.1:123"` or
/// `"somehost.tld/1.1.1.1:123"` form.
///
/// In the latter shape the hostname before `/` wins over the bracketed IP;
/// the port is whatever follows the final `:`.
pub fn parse_publish_address(address: &str) -> Option<(String, u16)> {
    let (host_part, port_part) = match address.split_once('/') {
        Some((hostname, rest)) => {
            let port_str = rest.rsplit(':').next()?;
            (hostname.to_string(), port_str)
        }
        None => {
            let port_str = address.rsplit(':').next()?;
            let host_str = &address[..address.len() - port_str.len() - 1];
            (host_str.to_string(), port_str)
        }
    };
    let port = port_part.parse::<u16>().ok()?;
    Some((host_part, port))
}
