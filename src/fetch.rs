use std::fmt::Display;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::error::{NetworkError, ParseError};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/116.0.5845.97 Safari/537.36";
const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const MAX_REDIRECTS: usize = 10;

/// Markup of one schedule fetch.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub source: String,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

impl RawPage {
    pub fn new(source: impl Into<String>, body: impl Into<String>) -> Self {
        RawPage {
            source: source.into(),
            body: body.into(),
            fetched_at: Utc::now(),
        }
    }

    /// Reload the page a previous fetch left on disk.
    pub fn from_cache(path: &Path) -> Result<Self, ParseError> {
        let cache_err = |source| ParseError::Cache {
            path: path.display().to_string(),
            source,
        };
        let body = std::fs::read_to_string(path).map_err(cache_err)?;
        let fetched_at = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(RawPage {
            source: format!("file:{}", path.display()),
            body,
            fetched_at,
        })
    }
}

/// Bounded exponential backoff between fetch attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            min_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Wait after the given failed attempt (1-based): doubles from the floor, capped.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.min_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op` until it succeeds or the policy runs out of attempts.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    target: &str,
    mut op: F,
) -> Result<T, NetworkError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut last = String::new();

    for attempt in 1..=attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                last = format!("{:#}", e);
                if attempt == attempts {
                    break;
                }
                let backoff = policy.delay_after(attempt);
                warn!(
                    "Fetching {} failed (attempt {}/{}): {}; retrying in {:.1}s",
                    target,
                    attempt,
                    attempts,
                    last,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }

    Err(NetworkError::Exhausted { attempts, last })
}

/// Downloads the departures page with a browser-looking client.
pub struct Fetcher {
    client: reqwest::Client,
    url: String,
    cache_path: Option<PathBuf>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NetworkError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

        // Accept-Encoding is left to reqwest so it can decompress gzip/deflate/br itself.
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()
            .map_err(NetworkError::Client)?;

        Ok(Fetcher {
            client,
            url: url.into(),
            cache_path: None,
            policy: RetryPolicy::default(),
        })
    }

    pub fn with_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    #[allow(dead_code)]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetch the page, retrying per policy, and refresh the on-disk copy.
    pub async fn fetch(&self) -> Result<RawPage, NetworkError> {
        info!("Fetching departures page: {}", self.url);
        let body = with_retry(&self.policy, &self.url, |_| self.fetch_once()).await?;
        let page = RawPage::new(self.url.as_str(), body);
        info!("Fetched {} bytes from {}", page.body.len(), self.url);

        if let Some(path) = &self.cache_path {
            match write_cache(path, &page.body) {
                Ok(()) => info!("HTML saved to {}", path.display()),
                Err(e) => warn!("Could not cache page at {}: {}", path.display(), e),
            }
        }
        Ok(page)
    }

    async fn fetch_once(&self) -> anyhow::Result<String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("HTTP request failed")?;

        let status = response.status();
        log_response(&self.url, status, response.headers());
        if !status.is_success() {
            bail!("HTTP {} for {}", status, self.url);
        }

        response
            .text()
            .await
            .context("Failed to read response body")
    }
}

fn log_response(url: &str, status: StatusCode, headers: &HeaderMap) {
    info!(
        %status,
        content_type = header_str(headers, header::CONTENT_TYPE),
        server = header_str(headers, header::SERVER),
        retry_after = header_str(headers, header::RETRY_AFTER),
        set_cookie = headers.contains_key(header::SET_COOKIE),
        "Response from {}",
        url
    );
    for (name, value) in headers {
        let value = value.to_str().unwrap_or("<non-ascii>");
        if status.is_success() {
            debug!(header = %name, value, "Response header");
        } else {
            warn!(%status, header = %name, value, "Response header");
        }
    }
}

/// Header value for logging; `-` when absent or not visible ASCII.
fn header_str(headers: &HeaderMap, name: header::HeaderName) -> &str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}

fn write_cache(path: &Path, body: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    type Served = (String, Arc<AtomicUsize>, mpsc::UnboundedReceiver<String>);

    /// Answers one connection per scripted response, then stops.
    async fn serve(script: Vec<(u16, &'static str)>) -> Served {
        serve_with_headers(script.into_iter().map(|(s, b)| (s, "", b)).collect()).await
    }

    /// Like `serve`, with extra header lines per response. Every request head
    /// read is handed back on the channel.
    async fn serve_with_headers(script: Vec<(u16, &'static str, &'static str)>) -> Served {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for (status, extra, body) in script {
                let (mut socket, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);

                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let _ = tx.send(String::from_utf8_lossy(&request).into_owned());

                let reply = format!(
                    "HTTP/1.1 {} Scripted\r\nContent-Type: text/html; charset=utf-8\r\nX-Served-By: test\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    extra,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}/rozklad-lotow/warszawa-waw/odloty", addr), hits, rx)
    }

    /// Value of `name` in a raw request head, matched case-insensitively.
    fn request_header<'a>(request: &'a str, name: &str) -> Option<&'a str> {
        request.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn default_backoff_schedule() {
        let p = RetryPolicy::default();
        let delays: Vec<u64> = (1..p.max_attempts).map(|a| p.delay_after(a).as_secs()).collect();
        assert_eq!(delays, vec![4, 8, 10, 10]);
    }

    #[test]
    fn backoff_never_exceeds_cap() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_after(40), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn five_failures_exhaust_after_bounded_backoff() {
        let start = tokio::time::Instant::now();
        let mut calls = 0u32;

        let result: Result<(), _> = with_retry(&RetryPolicy::default(), "test", |attempt| {
            calls += 1;
            async move { Err(format!("HTTP 503 on attempt {}", attempt)) }
        })
        .await;

        let elapsed = start.elapsed();
        assert_eq!(calls, 5);
        match result {
            Err(NetworkError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 5);
                assert!(last.contains("attempt 5"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert!(elapsed >= Duration::from_secs(16) && elapsed <= Duration::from_secs(40));
        assert!(elapsed >= Duration::from_secs(32) && elapsed < Duration::from_secs(33));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_retrying_on_first_success() {
        let start = tokio::time::Instant::now();
        let mut calls = 0u32;

        let value = with_retry(&RetryPolicy::default(), "test", |attempt| {
            calls += 1;
            async move {
                if attempt < 3 {
                    Err("HTTP 429")
                } else {
                    Ok("<html></html>")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "<html></html>");
        assert_eq!(calls, 3);
        assert!(start.elapsed() >= Duration::from_secs(12));
        assert!(start.elapsed() < Duration::from_secs(13));
    }

    #[tokio::test]
    async fn non_success_status_exhausts_retries() {
        let (url, hits, _) = serve(vec![(503, ""); 5]).await;
        let fetcher = Fetcher::new(url, Duration::from_secs(5))
            .unwrap()
            .with_policy(quick_policy());

        match fetcher.fetch().await {
            Err(NetworkError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 5);
                assert!(last.contains("503"), "last error: {}", last);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn success_after_failure_writes_cache() {
        let body = "<table><tr><td>Oslo</td></tr></table>";
        let (url, hits, _) = serve(vec![(500, "oops"), (200, body)]).await;
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("nested").join("schedule_data.html");

        let fetcher = Fetcher::new(url.clone(), Duration::from_secs(5))
            .unwrap()
            .with_policy(quick_policy())
            .with_cache(&cache);
        let page = fetcher.fetch().await.unwrap();

        assert_eq!(page.body, body);
        assert_eq!(page.source, url);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(std::fs::read_to_string(&cache).unwrap(), body);

        let cached = RawPage::from_cache(&cache).unwrap();
        assert_eq!(cached.body, body);
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        // bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = Fetcher::new(format!("http://{}/", addr), Duration::from_secs(2))
            .unwrap()
            .with_policy(RetryPolicy {
                max_attempts: 2,
                ..quick_policy()
            });
        assert!(matches!(
            fetcher.fetch().await,
            Err(NetworkError::Exhausted { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn sends_browser_headers() {
        let (url, _, mut requests) = serve(vec![(200, "<html></html>")]).await;
        Fetcher::new(url, Duration::from_secs(5))
            .unwrap()
            .fetch()
            .await
            .unwrap();

        let request = requests.recv().await.unwrap();
        assert!(request.starts_with("GET /rozklad-lotow/warszawa-waw/odloty "));
        assert_eq!(request_header(&request, "user-agent"), Some(USER_AGENT));
        assert_eq!(request_header(&request, "accept"), Some(ACCEPT));
        assert_eq!(request_header(&request, "connection"), Some("keep-alive"));
        assert_eq!(request_header(&request, "upgrade-insecure-requests"), Some("1"));
    }

    #[tokio::test]
    async fn cookies_survive_redirects() {
        let (url, hits, mut requests) = serve_with_headers(vec![
            (
                302,
                "Location: /rozklad-lotow/warszawa-waw/odloty?page=1\r\nSet-Cookie: session=abc123; Path=/\r\n",
                "",
            ),
            (200, "", "<html></html>"),
        ])
        .await;

        let page = Fetcher::new(url, Duration::from_secs(5))
            .unwrap()
            .with_policy(quick_policy())
            .fetch()
            .await
            .unwrap();
        assert_eq!(page.body, "<html></html>");
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let first = requests.recv().await.unwrap();
        assert_eq!(request_header(&first, "cookie"), None);
        let second = requests.recv().await.unwrap();
        assert!(second.starts_with("GET /rozklad-lotow/warszawa-waw/odloty?page=1 "));
        assert_eq!(request_header(&second, "cookie"), Some("session=abc123"));
    }

    #[test]
    fn throttling_headers_are_read_for_logging() {
        let mut headers = HeaderMap::new();
        headers.insert(header::RETRY_AFTER, HeaderValue::from_static("120"));
        headers.insert(header::SERVER, HeaderValue::from_static("cloudflare"));

        assert_eq!(header_str(&headers, header::RETRY_AFTER), "120");
        assert_eq!(header_str(&headers, header::SERVER), "cloudflare");
        assert_eq!(header_str(&headers, header::CONTENT_TYPE), "-");
    }

    #[test]
    fn missing_cache_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RawPage::from_cache(&dir.path().join("absent.html")).unwrap_err();
        assert!(matches!(err, ParseError::Cache { .. }));
    }
}
