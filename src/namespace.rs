//! Namespaced sub-client composition.
//!
//! The reference client's sub-clients (`es.indices`, `es.cluster`, ...)
//! hold a weak back-reference to the parent so they can call
//! `perform_request` without owning the Transport. A Rust sub-client
//! instead holds a plain borrowed reference with a documented lifetime
//! rule: it must not outlive the [`crate::Transport`] that created it. This
//! module gives that pattern one concrete instantiation --
//! [`ClusterNamespace`], wrapping the one cluster-admin call already in
//! scope (`GET /_nodes/_all/http`) -- rather than leaving it as a comment.

use crate::error::Result;
use crate::serializer::Decoded;
use crate::transport::Transport;

/// Marker trait for a namespaced sub-client: something that only ever talks
/// to its cluster through a borrowed [`Transport`].
pub trait NamespacedClient<'t> {
    fn transport(&self) -> &'t Transport;
}

/// The cluster-administration namespace. Construction borrows the
/// Transport; the namespace must not outlive it.
pub struct ClusterNamespace<'t> {
    transport: &'t Transport,
}

impl<'t> ClusterNamespace<'t> {
    pub fn new(transport: &'t Transport) -> Self {
        ClusterNamespace { transport }
    }

    /// `GET /_nodes/_all/http` -- the same call the sniffer issues, exposed
    /// here as a regular API surface for callers who want the raw node
    /// list without triggering a pool rebuild.
    pub fn nodes_http(&self) -> Result<Decoded> {
        self.transport
            .perform_request("GET", "/_nodes/_all/http", None, None, None)
    }
}

impl<'t> NamespacedClient<'t> for ClusterNamespace<'t> {
    fn transport(&self) -> &'t Transport {
        self.transport
    }
}
