use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::config::{CrawlConfig, ProxyConfig, SEARCH_PATH};
use crate::error::{FetchCause, FetchError};

/// One unit of the crawl matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub keyword: String,
    pub page: u32,
}

impl PageRequest {
    pub fn new(keyword: impl Into<String>, page: u32) -> Self {
        Self {
            keyword: keyword.into(),
            page,
        }
    }

    /// Search results URL on the job site itself.
    pub fn target_url(&self, base: &Url) -> Url {
        let mut url = base.clone();
        url.set_path(SEARCH_PATH);
        url.query_pairs_mut()
            .clear()
            .append_pair("searchType", "search")
            .append_pair("searchword", &self.keyword)
            .append_pair("recruitPage", &self.page.to_string());
        url
    }
}

/// Bounded retry with exponential backoff and jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let secs = (self.initial_backoff.as_secs_f64() * self.multiplier.powi(exp))
            .min(self.max_backoff.as_secs_f64());
        let range = secs * self.jitter;
        let jittered = if range > 0.0 {
            secs + rand::thread_rng().gen_range(-range..range)
        } else {
            secs
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }

    pub fn should_retry(&self, attempt: u32, cause: &FetchCause) -> bool {
        attempt <= self.max_retries && cause.is_transient()
    }
}

/// Source of search result HTML.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, request: &PageRequest) -> Result<String, FetchError>;

    /// Origin used to absolutize relative job links.
    fn base_url(&self) -> &Url;
}

/// HTTP fetcher owning its connection pool, optionally routed through a
/// scraping proxy.
pub struct Fetcher {
    client: Client,
    base_url: Url,
    proxy: Option<ProxyConfig>,
    retry: RetryPolicy,
}

impl Fetcher {
    pub fn new(config: &CrawlConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.workers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            proxy: config.proxy.clone(),
            retry: config.retry.clone(),
        })
    }

    fn request_url(&self, target: &Url) -> Url {
        match &self.proxy {
            Some(proxy) => proxy.wrap(target),
            None => target.clone(),
        }
    }

    async fn fetch_once(&self, url: Url) -> Result<String, FetchCause> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchCause::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchCause::Status(status.as_u16()));
        }

        response.text().await.map_err(FetchCause::from_reqwest)
    }
}

#[async_trait]
impl PageFetcher for Fetcher {
    async fn fetch(&self, request: &PageRequest) -> Result<String, FetchError> {
        let target = request.target_url(&self.base_url);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(url = %target, attempt, "fetching page");

            let cause = match self.fetch_once(self.request_url(&target)).await {
                Ok(body) => return Ok(body),
                Err(cause) => cause,
            };

            if !self.retry.should_retry(attempt, &cause) {
                return Err(FetchError {
                    keyword: request.keyword.clone(),
                    page: request.page,
                    attempts: attempt,
                    cause,
                });
            }

            let delay = self.retry.backoff(attempt);
            warn!(
                keyword = %request.keyword,
                page = request.page,
                error = %cause,
                ?delay,
                "page fetch failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_USER_AGENT;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `responses` in order, one per connection, then repeats the last.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (Url, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = responses[n.min(responses.len() - 1)];
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (Url::parse(&format!("http://{}", addr)).unwrap(), hits)
    }

    /// Answers 200 to every connection and keeps the raw request heads.
    async fn serve_recording() -> (Url, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = requests.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                log.lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&buf[..n]).into_owned());
                let body = "<html></html>";
                let reply = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (Url::parse(&format!("http://{}", addr)).unwrap(), requests)
    }

    /// Accepts connections and never answers.
    async fn serve_silent() -> (Url, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                open.push(socket);
            }
        });

        (Url::parse(&format!("http://{}", addr)).unwrap(), hits)
    }

    fn config_for(base: Url, retries: u32) -> CrawlConfig {
        CrawlConfig {
            base_url: base,
            timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_retries: retries,
                initial_backoff: Duration::from_millis(1),
                ..RetryPolicy::default()
            },
            ..CrawlConfig::default()
        }
    }

    #[test]
    fn test_target_url() {
        let base = Url::parse("https://www.saramin.co.kr").unwrap();
        let url = PageRequest::new("rust developer", 3).target_url(&base);
        assert_eq!(
            url.as_str(),
            "https://www.saramin.co.kr/zf_user/search/recruit?searchType=search&searchword=rust+developer&recruitPage=3"
        );
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(10), Duration::from_secs(10));
    }

    #[test]
    fn test_should_retry_only_transient_within_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1, &FetchCause::Timeout));
        assert!(!policy.should_retry(2, &FetchCause::Timeout));
        assert!(!policy.should_retry(1, &FetchCause::Status(404)));
        let never = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        assert!(!never.should_retry(1, &FetchCause::Timeout));
    }

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let (base, hits) = serve(vec![(200, "<html>ok</html>")]).await;
        let fetcher = Fetcher::new(&config_for(base, 1)).unwrap();

        let body = fetcher.fetch(&PageRequest::new("python", 1)).await.unwrap();
        assert_eq!(body, "<html>ok</html>");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_retries_server_error_once() {
        let (base, hits) = serve(vec![(503, "busy"), (200, "<html>second</html>")]).await;
        let fetcher = Fetcher::new(&config_for(base, 1)).unwrap();

        let body = fetcher.fetch(&PageRequest::new("python", 1)).await.unwrap();
        assert_eq!(body, "<html>second</html>");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_gives_up_after_retry_budget() {
        let (base, hits) = serve(vec![(500, "down")]).await;
        let fetcher = Fetcher::new(&config_for(base, 1)).unwrap();

        let err = fetcher.fetch(&PageRequest::new("python", 4)).await.unwrap_err();
        assert_eq!(err.page, 4);
        assert_eq!(err.attempts, 2);
        assert_eq!(err.cause, FetchCause::Status(500));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_does_not_retry_client_error() {
        let (base, hits) = serve(vec![(404, "missing")]).await;
        let fetcher = Fetcher::new(&config_for(base, 3)).unwrap();

        let err = fetcher.fetch(&PageRequest::new("python", 1)).await.unwrap_err();
        assert_eq!(err.cause, FetchCause::Status(404));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_times_out_on_hung_server() {
        let (base, hits) = serve_silent().await;
        let config = CrawlConfig {
            timeout: Duration::from_secs(1),
            ..config_for(base, 1)
        };
        let fetcher = Fetcher::new(&config).unwrap();

        let started = Instant::now();
        let err = fetcher.fetch(&PageRequest::new("python", 2)).await.unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err.cause, FetchCause::Timeout);
        assert_eq!(err.attempts, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_fetch_sends_configured_user_agent() {
        let (base, requests) = serve_recording().await;
        let fetcher = Fetcher::new(&config_for(base, 0)).unwrap();

        fetcher.fetch(&PageRequest::new("python", 1)).await.unwrap();

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].contains(DEFAULT_USER_AGENT));
        assert!(requests[0].contains("searchword=python"));
        assert!(requests[0].contains("recruitPage=1"));
    }

    #[tokio::test]
    async fn test_proxy_errors_do_not_leak_api_key() {
        // Nothing listens on port 9; the connect error must not echo the URL.
        let mut config = config_for(Url::parse("http://127.0.0.1:9").unwrap(), 0);
        config.proxy = Some(ProxyConfig::new(
            Url::parse("http://127.0.0.1:9/").unwrap(),
            "secret-api-key",
        ));
        let fetcher = Fetcher::new(&config).unwrap();

        let err = fetcher.fetch(&PageRequest::new("python", 1)).await.unwrap_err();
        assert!(!err.to_string().contains("secret-api-key"));
    }
}
