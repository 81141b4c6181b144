use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::fetch::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://www.saramin.co.kr";
pub const SEARCH_PATH: &str = "/zf_user/search/recruit";
pub const DEFAULT_PROXY_ENDPOINT: &str = "https://api.scraperapi.com";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

pub const API_KEY_VAR: &str = "SCRAPER_API_KEY";
pub const DB_PATH_VAR: &str = "JOBCRAWL_DB";

/// Scraping proxy credentials. The key is a secret and is redacted from `Debug`.
#[derive(Clone)]
pub struct ProxyConfig {
    pub endpoint: Url,
    api_key: String,
}

impl ProxyConfig {
    pub fn new(endpoint: Url, api_key: impl Into<String>) -> Self {
        Self {
            endpoint,
            api_key: api_key.into(),
        }
    }

    /// Wraps a destination URL so the proxy fetches it on our behalf.
    pub fn wrap(&self, target: &Url) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("api_key", &self.api_key)
            .append_pair("url", target.as_str());
        url
    }
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub base_url: Url,
    pub proxy: Option<ProxyConfig>,
    pub user_agent: String,
    pub timeout: Duration,
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            proxy: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            workers: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// Knobs supplied on the command line.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub base_url: String,
    pub use_proxy: bool,
    pub proxy_endpoint: String,
    pub timeout_secs: u64,
    pub workers: usize,
    pub retries: u32,
}

impl CrawlConfig {
    /// Builds the crawl configuration from CLI options plus the environment
    /// (a `.env` file is loaded first if present).
    pub fn from_env(opts: &CrawlOptions) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let base_url = parse_url(&opts.base_url)?;

        let proxy = if opts.use_proxy {
            let api_key = env::var(API_KEY_VAR)
                .ok()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .ok_or(ConfigError::MissingApiKey)?;
            Some(ProxyConfig::new(parse_url(&opts.proxy_endpoint)?, api_key))
        } else {
            None
        };

        let config = Self {
            base_url,
            proxy,
            timeout: Duration::from_secs(opts.timeout_secs.max(1)),
            workers: opts.workers,
            retry: RetryPolicy {
                max_retries: opts.retries,
                ..RetryPolicy::default()
            },
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "not a base URL".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Database location: explicit flag, then `JOBCRAWL_DB`, then the XDG data dir.
pub fn database_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    if let Ok(path) = env::var(DB_PATH_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobcrawl") {
        proj_dirs.data_dir().join("jobcrawl.db")
    } else {
        PathBuf::from("jobcrawl.db")
    }
}
