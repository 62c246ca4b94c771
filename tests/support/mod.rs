#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration as StdDuration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use sizeproxy::{
    proxy::{self, AppContext, cache::DiskCache},
    settings::Settings,
};

const MIN_SIZE: usize = 100;
const MAX_SIZE: usize = 20_000;

/// HTML document of exactly `size` bytes, the way the reference document
/// server builds them.
pub fn generate_html(size: usize) -> String {
    let digits = size.to_string().len();
    let content = "x".repeat(size.saturating_sub(75 + digits));
    format!(
        "<HTML>\n<HEAD>\n<TITLE>I am {size} bytes long</TITLE>\n</HEAD>\n<BODY>{content}</BODY>\n</HTML>"
    )
}

fn empty_response(status: &str) -> Vec<u8> {
    format!("HTTP/1.0 {status}\r\nContent-Length: 0\r\n\r\n").into_bytes()
}

fn document_response(request: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(request);
    let line = text.split("\r\n").next().unwrap_or_default();
    let mut parts = line.splitn(3, ' ');
    let (Some(method), Some(uri)) = (parts.next(), parts.next()) else {
        return empty_response("400 Bad Request");
    };
    match method {
        "GET" => {}
        "HEAD" | "POST" | "PUT" => return empty_response("501 Not Implemented"),
        _ => return empty_response("400 Bad Request"),
    }
    let Some(size) = uri
        .strip_prefix('/')
        .map(|digits| digits.trim_start_matches('/'))
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse::<usize>().ok())
    else {
        return empty_response("400 Bad Request");
    };
    if !(MIN_SIZE..=MAX_SIZE).contains(&size) {
        return empty_response("400 Bad Request");
    }
    let html = generate_html(size);
    format!(
        "HTTP/1.0 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
        html.len(),
        html
    )
    .into_bytes()
}

/// Document server that answers `GET /<N>` with an `N`-byte HTML page and
/// closes, recording every request line it sees.
pub struct DocumentOrigin {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl DocumentOrigin {
    pub async fn spawn() -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(Mutex::new(Vec::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = requests.clone();
        let counter = hits.clone();
        let handle = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let seen = seen.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 1024];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    let request = &buf[..n];
                    let line = String::from_utf8_lossy(request)
                        .split("\r\n")
                        .next()
                        .unwrap_or_default()
                        .to_string();
                    seen.lock().unwrap().push(line);
                    let _ = socket.write_all(&document_response(request)).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        Ok(Self {
            addr,
            requests,
            hits,
            handle,
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn request_lines(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for DocumentOrigin {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A port nothing listens on.
pub fn closed_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

pub struct ProxyHarness {
    _temp: TempDir,
    pub addr: SocketAddr,
    pub settings: Arc<Settings>,
    pub cache_dir: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<()>>,
}

impl ProxyHarness {
    pub async fn spawn(origin_port: u16, max_cache_size: u64) -> Result<Self> {
        Self::spawn_with(origin_port, max_cache_size, |_| {}).await
    }

    pub async fn spawn_with<F>(origin_port: u16, max_cache_size: u64, customize: F) -> Result<Self>
    where
        F: FnOnce(&mut Settings),
    {
        let temp = TempDir::new()?;
        let cache_dir = temp.path().join("cache");
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;

        let mut settings = Settings {
            listen: addr,
            origin_host: "127.0.0.1".to_string(),
            origin_port,
            cache_dir: cache_dir.clone(),
            max_cache_size,
            client_timeout: Some(5),
            upstream_connect_timeout: Some(2),
            upstream_timeout: Some(5),
            ..Settings::default()
        };
        customize(&mut settings);
        settings.validate()?;
        let settings = Arc::new(settings);

        let cache = Arc::new(
            DiskCache::open(settings.cache_dir.clone(), settings.max_cache_size).await?,
        );
        let app = AppContext::new(settings.clone(), cache);
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(proxy::listener::serve(listener, app, async move {
            let _ = rx.await;
        }));

        Ok(Self {
            _temp: temp,
            addr,
            settings,
            cache_dir,
            shutdown: Some(tx),
            handle,
        })
    }

    /// Sends `request` on a fresh connection and reads until the proxy
    /// closes it.
    pub async fn send(&self, request: &[u8]) -> Result<Vec<u8>> {
        let mut stream = TcpStream::connect(self.addr).await?;
        stream.write_all(request).await?;
        let mut response = Vec::new();
        timeout(
            StdDuration::from_secs(10),
            stream.read_to_end(&mut response),
        )
        .await
        .map_err(|_| anyhow!("proxy did not close the connection"))??;
        Ok(response)
    }

    pub fn entry_path(&self, key: u32) -> PathBuf {
        self.cache_dir.join(key.to_string())
    }

    pub fn cache_total(&self) -> Result<u64> {
        cache_total(&self.cache_dir)
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.handle).await??;
        Ok(())
    }
}

/// Sum of the sizes of all decimal-named entry files under `dir`.
pub fn cache_total(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let is_key = name
            .to_str()
            .map(|name| !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false);
        if is_key {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

pub fn status_line(response: &[u8]) -> String {
    String::from_utf8_lossy(response)
        .split("\r\n")
        .next()
        .unwrap_or_default()
        .to_string()
}
