use std::time::Duration;

use guise::{Client, ErrorKind};

mod helpers;
use helpers::mock_server::{MockHttpServer, Reply};
use helpers::tls::acceptor_with_alpn;

#[tokio::test]
async fn test_get_retries_failed_connects() {
    let (acceptor, ca_cert) = acceptor_with_alpn(b"\x08http/1.1");
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url_tls();
    let handle = server.start_tls_after_drops(acceptor, 2, |_| Reply::ok("third time"));

    let client = Client::builder()
        .add_root_certificate(ca_cert)
        .retries(2)
        .build()
        .unwrap();
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.content().unwrap().as_ref(), b"third time");

    assert_eq!(handle.connections(), 3);
    assert_eq!(handle.requests().len(), 1);
}

#[tokio::test]
async fn test_retries_exhausted_returns_connect_error() {
    let (acceptor, ca_cert) = acceptor_with_alpn(b"\x08http/1.1");
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url_tls();
    let handle = server.start_tls_after_drops(acceptor, 5, |_| Reply::ok("unreachable"));

    let client = Client::builder()
        .add_root_certificate(ca_cert)
        .retries(2)
        .build()
        .unwrap();
    let err = client.get(&url).send().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectError);
    assert_eq!(handle.connections(), 3);
}

#[tokio::test]
async fn test_post_connects_once() {
    let (acceptor, ca_cert) = acceptor_with_alpn(b"\x08http/1.1");
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url_tls();
    let handle = server.start_tls_after_drops(acceptor, 1, |_| Reply::ok("created"));

    let client = Client::builder()
        .add_root_certificate(ca_cert)
        .retries(2)
        .build()
        .unwrap();
    let err = client.post(&url).content("payload").send().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectError);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.connections(), 1);
    assert!(handle.requests().is_empty());
}

#[tokio::test]
async fn test_no_retries_by_default() {
    let (acceptor, ca_cert) = acceptor_with_alpn(b"\x08http/1.1");
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url_tls();
    let handle = server.start_tls_after_drops(acceptor, 1, |_| Reply::ok("Hello"));

    let client = Client::builder().add_root_certificate(ca_cert).build().unwrap();
    assert_eq!(
        client.get(&url).send().await.unwrap_err().kind(),
        ErrorKind::ConnectError
    );
    assert_eq!(handle.connections(), 1);

    // The next call connects cleanly.
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_failure_after_connect_is_not_retried() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    // Read the request, then hang up without answering.
    let handle = server.start(|_| Reply::default().close());

    let client = Client::builder().retries(3).build().unwrap();
    let err = client.get(&url).send().await.unwrap_err();
    assert!(!matches!(
        err.kind(),
        ErrorKind::ConnectError | ErrorKind::ConnectTimeout
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.connections(), 1);
    assert_eq!(handle.requests().len(), 1);
}
