mod support;

use std::fs;
use std::time::{Duration as StdDuration, SystemTime};

use anyhow::Result;

use support::*;

#[tokio::test]
async fn miss_then_hit_serves_identical_bytes_from_cache() -> Result<()> {
    let origin = DocumentOrigin::spawn().await?;
    let proxy = ProxyHarness::spawn(origin.port(), 1_000_000).await?;

    let first = proxy.send(b"GET /500 HTTP/1.0\r\nHost: localhost\r\n\r\n").await?;
    assert_eq!(status_line(&first), "HTTP/1.0 200 OK");
    assert!(first.ends_with(generate_html(500).as_bytes()));
    assert_eq!(origin.hits(), 1);
    assert_eq!(fs::read(proxy.entry_path(500))?, first);

    let second = proxy.send(b"GET /500 HTTP/1.0\r\nHost: localhost\r\n\r\n").await?;
    assert_eq!(second, first);
    assert_eq!(origin.hits(), 1);

    proxy.shutdown().await
}

#[tokio::test]
async fn absolute_and_relative_forms_share_an_entry() -> Result<()> {
    let origin = DocumentOrigin::spawn().await?;
    let proxy = ProxyHarness::spawn(origin.port(), 1_000_000).await?;

    let absolute = format!(
        "GET http://127.0.0.1:{}/700 HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
        origin.port()
    );
    let first = proxy.send(absolute.as_bytes()).await?;
    let second = proxy.send(b"GET /700 HTTP/1.1\r\n\r\n").await?;

    assert_eq!(first, second);
    assert_eq!(origin.hits(), 1);
    assert_eq!(origin.request_lines(), vec!["GET /700 HTTP/1.1".to_string()]);

    proxy.shutdown().await
}

#[tokio::test]
async fn absolute_target_query_is_dropped_before_caching() -> Result<()> {
    let origin = DocumentOrigin::spawn().await?;
    let proxy = ProxyHarness::spawn(origin.port(), 1_000_000).await?;

    let request = format!(
        "GET http://127.0.0.1:{}/500?x=1 HTTP/1.0\r\n\r\n",
        origin.port()
    );
    let first = proxy.send(request.as_bytes()).await?;
    let second = proxy.send(b"GET /500 HTTP/1.0\r\n\r\n").await?;

    assert_eq!(status_line(&first), "HTTP/1.0 200 OK");
    assert_eq!(first, second);
    assert_eq!(origin.hits(), 1);
    assert!(proxy.entry_path(500).exists());
    assert_eq!(origin.request_lines(), vec!["GET /500 HTTP/1.0".to_string()]);

    proxy.shutdown().await
}

#[tokio::test]
async fn oversize_document_gets_414_and_is_never_stored() -> Result<()> {
    let origin = DocumentOrigin::spawn().await?;
    let proxy = ProxyHarness::spawn(origin.port(), 1_000_000).await?;

    let response = proxy.send(b"GET /99999999 HTTP/1.0\r\n\r\n").await?;
    assert_eq!(
        response,
        b"HTTP/1.0 414 Request-URI Too Long\r\nContent-Length: 0\r\n\r\n"
    );
    assert_eq!(origin.hits(), 0);
    assert!(!proxy.entry_path(99_999_999).exists());

    proxy.shutdown().await
}

#[tokio::test]
async fn post_is_relayed_every_time_and_never_cached() -> Result<()> {
    let origin = DocumentOrigin::spawn().await?;
    let proxy = ProxyHarness::spawn(origin.port(), 1_000_000).await?;

    let first = proxy.send(b"POST /500 HTTP/1.0\r\n\r\n").await?;
    let second = proxy.send(b"POST /500 HTTP/1.0\r\n\r\n").await?;

    assert_eq!(status_line(&first), "HTTP/1.0 501 Not Implemented");
    assert_eq!(first, second);
    assert_eq!(origin.hits(), 2);
    assert!(!proxy.entry_path(500).exists());

    proxy.shutdown().await
}

#[tokio::test]
async fn malformed_request_line_gets_400_without_forwarding() -> Result<()> {
    let origin = DocumentOrigin::spawn().await?;
    let proxy = ProxyHarness::spawn(origin.port(), 1_000_000).await?;

    let response = proxy.send(b"GET /500\r\n\r\n").await?;
    assert_eq!(
        response,
        b"HTTP/1.0 400 Bad Request\r\nContent-Length: 0\r\n\r\n"
    );
    assert_eq!(origin.hits(), 0);

    proxy.shutdown().await
}

#[tokio::test]
async fn unreachable_origin_gets_404() -> Result<()> {
    let proxy = ProxyHarness::spawn(closed_port()?, 1_000_000).await?;

    let response = proxy.send(b"GET /500 HTTP/1.0\r\n\r\n").await?;
    assert_eq!(
        response,
        b"HTTP/1.0 404 Not Found\r\nContent-Length: 0\r\n\r\n"
    );
    assert!(!proxy.entry_path(500).exists());

    proxy.shutdown().await
}

#[tokio::test]
async fn foreign_host_is_relayed_blindly() -> Result<()> {
    let origin = DocumentOrigin::spawn().await?;
    let proxy = ProxyHarness::spawn(origin.port(), 1_000_000).await?;

    let request = format!(
        "GET http://localhost:{}/300 HTTP/1.0\r\n\r\n",
        origin.port()
    );
    let first = proxy.send(request.as_bytes()).await?;
    let second = proxy.send(request.as_bytes()).await?;

    assert_eq!(status_line(&first), "HTTP/1.0 200 OK");
    assert_eq!(first, second);
    assert_eq!(origin.hits(), 2);
    assert!(!proxy.entry_path(300).exists());
    assert_eq!(
        origin.request_lines(),
        vec!["GET /300 HTTP/1.0".to_string(); 2]
    );

    proxy.shutdown().await
}

#[tokio::test]
async fn non_numeric_path_is_relayed_uncached() -> Result<()> {
    let origin = DocumentOrigin::spawn().await?;
    let proxy = ProxyHarness::spawn(origin.port(), 1_000_000).await?;

    let response = proxy.send(b"GET /index.html HTTP/1.0\r\n\r\n").await?;
    assert_eq!(status_line(&response), "HTTP/1.0 400 Bad Request");
    assert_eq!(origin.hits(), 1);
    assert_eq!(proxy.cache_total()?, 0);

    proxy.shutdown().await
}

#[tokio::test]
async fn cache_stays_within_bound_evicting_oldest_first() -> Result<()> {
    let origin = DocumentOrigin::spawn().await?;
    let proxy = ProxyHarness::spawn(origin.port(), 2_000).await?;

    proxy.send(b"GET /600 HTTP/1.0\r\n\r\n").await?;
    let aged = fs::OpenOptions::new()
        .write(true)
        .open(proxy.entry_path(600))?;
    aged.set_modified(SystemTime::now() - StdDuration::from_secs(120))?;
    drop(aged);

    proxy.send(b"GET /700 HTTP/1.0\r\n\r\n").await?;
    assert!(proxy.cache_total()? <= 2_000);
    assert!(proxy.entry_path(600).exists());

    proxy.send(b"GET /800 HTTP/1.0\r\n\r\n").await?;
    assert!(proxy.cache_total()? <= 2_000);
    assert!(!proxy.entry_path(600).exists());
    assert!(proxy.entry_path(700).exists());
    assert!(proxy.entry_path(800).exists());

    proxy.shutdown().await
}

#[tokio::test]
async fn zero_bound_forwards_but_retains_nothing() -> Result<()> {
    let origin = DocumentOrigin::spawn().await?;
    let proxy = ProxyHarness::spawn(origin.port(), 0).await?;

    let first = proxy.send(b"GET /500 HTTP/1.0\r\n\r\n").await?;
    let second = proxy.send(b"GET /500 HTTP/1.0\r\n\r\n").await?;

    assert_eq!(status_line(&first), "HTTP/1.0 200 OK");
    assert_eq!(first, second);
    assert_eq!(origin.hits(), 2);
    assert_eq!(proxy.cache_total()?, 0);

    proxy.shutdown().await
}

#[tokio::test]
async fn concurrent_clients_are_all_served() -> Result<()> {
    let origin = DocumentOrigin::spawn().await?;
    let proxy = ProxyHarness::spawn_with(origin.port(), 1_000_000, |settings| {
        settings.max_connections = Some(2);
    })
    .await?;

    let mut tasks = Vec::new();
    for size in [200u32, 300, 400, 500, 600] {
        let addr = proxy.addr;
        tasks.push(tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let mut stream = tokio::net::TcpStream::connect(addr).await?;
            stream
                .write_all(format!("GET /{size} HTTP/1.0\r\n\r\n").as_bytes())
                .await?;
            let mut response = Vec::new();
            stream.read_to_end(&mut response).await?;
            Ok::<_, anyhow::Error>((size, response))
        }));
    }

    for task in tasks {
        let (size, response) = task.await??;
        assert_eq!(status_line(&response), "HTTP/1.0 200 OK");
        assert!(response.ends_with(generate_html(size as usize).as_bytes()));
        assert!(proxy.entry_path(size).exists());
    }
    assert_eq!(origin.hits(), 5);

    proxy.shutdown().await
}
