use guise::{Client, ErrorKind};

mod helpers;
use helpers::mock_server::{MockHttpServer, Reply};

#[tokio::test]
async fn test_301_post_becomes_get_without_body() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    let handle = server.start(|req| match req.path.as_str() {
        "/form" => Reply::redirect(301, "/done"),
        _ => Reply::ok("done"),
    });

    let client = Client::new().unwrap();
    let mut resp = client
        .post(format!("{}/form", url))
        .data([("name", "value")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "done");
    assert_eq!(resp.url().unwrap().path(), "/done");
    assert_eq!(resp.history().len(), 1);
    assert_eq!(resp.history()[0].path(), "/form");

    let requests = handle.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].body, b"name=value");
    assert_eq!(requests[1].method, "GET");
    assert!(requests[1].body.is_empty());
    assert!(requests[1].header("content-type").is_none());
}

#[tokio::test]
async fn test_307_preserves_method_and_body() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    let handle = server.start(|req| match req.path.as_str() {
        "/upload" => Reply::redirect(307, "/upload2"),
        _ => Reply::ok("stored"),
    });

    let resp = Client::new()
        .unwrap()
        .put(format!("{}/upload", url))
        .content("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let requests = handle.requests();
    assert_eq!(requests[1].method, "PUT");
    assert_eq!(requests[1].path, "/upload2");
    assert_eq!(requests[1].body, b"payload");
}

#[tokio::test]
async fn test_too_many_redirects() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    let handle = server.start(|req| {
        let n: u32 = req.path.trim_start_matches("/r").parse().unwrap_or(0);
        Reply::redirect(302, &format!("/r{}", n + 1))
    });

    let client = Client::builder().max_redirects(3).build().unwrap();
    let err = client.get(format!("{}/r0", url)).send().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TooManyRedirects);
    // The original request plus three followed hops.
    assert_eq!(handle.requests().len(), 4);
}

#[tokio::test]
async fn test_redirects_within_limit_succeed() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    server.start(|req| match req.path.as_str() {
        "/a" => Reply::redirect(302, "/b"),
        "/b" => Reply::redirect(308, "/c"),
        _ => Reply::ok("end"),
    });

    let client = Client::builder().max_redirects(2).build().unwrap();
    let resp = client.get(format!("{}/a", url)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let visited: Vec<_> = resp.history().iter().map(|u| u.path().to_string()).collect();
    assert_eq!(visited, ["/a", "/b"]);
}

#[tokio::test]
async fn test_redirects_disabled() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    let handle = server.start(|_| Reply::redirect(302, "/elsewhere"));

    let client = Client::builder().follow_redirects(false).build().unwrap();
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 302);
    assert!(resp.is_redirect());
    assert_eq!(resp.headers().get("location"), Some("/elsewhere"));
    assert!(resp.history().is_empty());
    assert_eq!(resp.raise_for_status().unwrap_err().kind(), ErrorKind::HttpStatusError);
    assert_eq!(handle.requests().len(), 1);
}

#[tokio::test]
async fn test_cross_origin_redirect_drops_authorization() {
    let target = MockHttpServer::new().await.unwrap();
    let target_url = target.url();
    let target_handle = target.start(|_| Reply::ok("other origin"));

    let origin = MockHttpServer::new().await.unwrap();
    let origin_url = origin.url();
    let location = format!("{}/landing", target_url);
    let origin_handle = origin.start(move |req| match req.path.as_str() {
        "/same" => Reply::redirect(302, "/next"),
        "/away" => Reply::redirect(302, &location),
        _ => Reply::ok("same origin"),
    });

    let client = Client::new().unwrap();
    client
        .get(format!("{}/same", origin_url))
        .header("Authorization", "Bearer secret")
        .send()
        .await
        .unwrap();
    let same = origin_handle.requests();
    assert_eq!(same[1].header("authorization"), Some("Bearer secret"));

    client
        .get(format!("{}/away", origin_url))
        .header("Authorization", "Bearer secret")
        .send()
        .await
        .unwrap();
    let away = target_handle.requests();
    assert_eq!(away.len(), 1);
    assert!(away[0].header("authorization").is_none());
}

#[tokio::test]
async fn test_cookies_set_during_redirect_are_sent() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    let handle = server.start(|req| match req.path.as_str() {
        "/login" => Reply::status(302, &[("Location", "/home"), ("Set-Cookie", "session=abc; Path=/")], ""),
        _ => Reply::ok("welcome"),
    });

    let client = Client::new().unwrap();
    client.get(format!("{}/login", url)).send().await.unwrap();

    let requests = handle.requests();
    assert!(requests[0].header("cookie").is_none());
    assert_eq!(requests[1].header("cookie"), Some("session=abc"));
}

#[tokio::test]
async fn test_location_with_unsupported_scheme() {
    let server = MockHttpServer::new().await.unwrap();
    let url = server.url();
    server.start(|_| Reply::redirect(302, "ftp://example.com/file"));

    let err = Client::new().unwrap().get(&url).send().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedProtocol);
}
