//! Black-box ports of the numbered end-to-end scenarios from the design
//! spec, driven through the public API against `FakeConnection` seeds
//! rather than a live cluster.

use es_transport::test_support::{FakeConnectionFactory, FakeResponse};
use es_transport::{ConnectionLike, HostConfig, Transport, TransportError, TransportOptions};

fn one_host_opts() -> TransportOptions {
    TransportOptions {
        hosts: vec![HostConfig::default().into()],
        meta_header: false,
        max_retries: 3,
        ..Default::default()
    }
}

#[test]
fn retry_exhaustion_raises_connection_error() {
    let factory = FakeConnectionFactory::new(vec![FakeResponse::connection_error("abandon ship")]);
    let transport = Transport::with_connection_factory(one_host_opts(), factory).unwrap();

    let err = transport
        .perform_request("GET", "/", None, None, None)
        .unwrap_err();

    assert!(matches!(err, TransportError::Connection { .. }));
}

#[test]
fn seven_x_publish_address_sniffs_to_hostname_and_port() {
    let factory = FakeConnectionFactory::new(vec![FakeResponse::ok(
        r#"{"nodes":{"a":{"roles":["data"],"http":{"publish_address":"somehost.tld/1.1.1.1:123"}}}}"#,
    )]);
    let opts = TransportOptions {
        hosts: vec![HostConfig::default().into()],
        sniff_on_start: true,
        meta_header: false,
        ..Default::default()
    };

    let transport = Transport::with_connection_factory(opts, factory).unwrap();

    let conns = transport.connections();
    assert_eq!(conns.len(), 1);
    assert_eq!(conns[0].host(), "http://somehost.tld:123");
}

#[test]
fn unsupported_product_header_message_matches_exactly() {
    let factory =
        FakeConnectionFactory::new(vec![FakeResponse::ok_with_product_value("{}", "BAD HEADER")]);
    let transport = Transport::with_connection_factory(one_host_opts(), factory).unwrap();

    let err = transport
        .perform_request("GET", "/", None, None, None)
        .unwrap_err();

    assert!(matches!(err, TransportError::UnsupportedProduct));
    assert_eq!(
        err.to_string(),
        "The client noticed that the server is not Elasticsearch and we do not support this unknown product"
    );
}

#[test]
fn http_error_preempts_unsupported_product_check() {
    let factory = FakeConnectionFactory::new(vec![FakeResponse::ok_with_product_value(
        "{}",
        "BAD HEADER",
    )
    .status(404)]);
    let transport = Transport::with_connection_factory(one_host_opts(), factory).unwrap();

    let err = transport
        .perform_request("GET", "/missing", None, None, None)
        .unwrap_err();

    assert!(matches!(err, TransportError::Http { status: 404, .. }));
}
