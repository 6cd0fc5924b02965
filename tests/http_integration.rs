//! Integration tests against a real (mocked) HTTP server, exercising the
//! parts `FakeConnection` can't: URL composition, header wire format, and
//! gzip request compression on the actual `reqwest::blocking` backend.
//!
//! The Transport's client is synchronous and blocking, but `wiremock`'s
//! server is async-native. A multi-threaded Tokio runtime is started once
//! and kept alive for the whole process; the mock server's listener task
//! keeps running on its worker threads even once the test steps outside
//! `block_on`, so the blocking client can talk to it from plain synchronous
//! test code.

use std::sync::OnceLock;

use tokio::runtime::Runtime;
use wiremock::matchers::{basic_auth, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use es_transport::{HostConfig, Transport, TransportOptions};

fn runtime() -> &'static Runtime {
    static RT: OnceLock<Runtime> = OnceLock::new();
    RT.get_or_init(|| Runtime::new().expect("failed to start background tokio runtime"))
}

fn host_for(server: &MockServer) -> HostConfig {
    let url = url::Url::parse(&server.uri()).unwrap();
    HostConfig {
        host: url.host_str().map(|s| s.to_string()),
        port: url.port(),
        ..Default::default()
    }
}

#[test]
fn round_trips_json_body_and_verifies_product_header() {
    let rt = runtime();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/my-index/_doc/1"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-elastic-product", "Elasticsearch")
                    .set_body_raw(
                        r#"{"_id":"1","result":"created"}"#.as_bytes().to_vec(),
                        "application/json",
                    ),
            )
            .mount(&server)
            .await;
        server
    });

    let transport = Transport::new(TransportOptions {
        hosts: vec![host_for(&server).into()],
        meta_header: false,
        ..Default::default()
    })
    .unwrap();

    let body = es_transport::BodyInput::Value(serde_json::json!({"field": "value"}));
    let decoded = transport
        .perform_request("PUT", "/my-index/_doc/1", None, Some(body), None)
        .unwrap();

    assert_eq!(decoded.as_json().unwrap()["result"], "created");
}

#[test]
fn basic_auth_header_reaches_the_server() {
    let rt = runtime();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(basic_auth("elastic", "changeme"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-elastic-product", "Elasticsearch")
                    .set_body_string("{}"),
            )
            .mount(&server)
            .await;
        server
    });

    let transport = Transport::new(TransportOptions {
        hosts: vec![host_for(&server).into()],
        http_auth: Some(es_transport::AuthValue::Pair(
            "elastic".to_string(),
            "changeme".to_string(),
        )),
        meta_header: false,
        ..Default::default()
    })
    .unwrap();

    transport
        .perform_request("GET", "/", None, None, None)
        .unwrap();
}

#[test]
fn http_compress_sends_gzip_content_encoding() {
    let rt = runtime();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-encoding", "gzip"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-elastic-product", "Elasticsearch")
                    .set_body_raw(r#"{"errors":false}"#.as_bytes().to_vec(), "application/json"),
            )
            .mount(&server)
            .await;
        server
    });

    let transport = Transport::new(TransportOptions {
        hosts: vec![host_for(&server).into()],
        http_compress: true,
        meta_header: false,
        ..Default::default()
    })
    .unwrap();

    let body = es_transport::BodyInput::Bytes(b"{\"index\":{}}\n{\"field\":\"value\"}\n".to_vec());
    let decoded = transport
        .perform_request("POST", "/_bulk", None, Some(body), None)
        .unwrap();

    assert_eq!(decoded.as_json().unwrap()["errors"], false);
}
