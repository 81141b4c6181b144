use thiserror::Error;

/// Problems with the run configuration. The only class of error that stops a
/// crawl before any page is fetched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SCRAPER_API_KEY is not set; pass --no-proxy to fetch the site directly")]
    MissingApiKey,

    #[error("no search keywords given")]
    NoKeywords,

    #[error("pages per keyword must be at least 1")]
    NoPages,

    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid CSS selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
}

/// Why a single page could not be retrieved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchCause {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("{0}")]
    Other(String),
}

impl FetchCause {
    pub fn is_transient(&self) -> bool {
        match self {
            FetchCause::Timeout | FetchCause::Connect(_) => true,
            FetchCause::Status(code) => *code == 429 || *code >= 500,
            FetchCause::Other(_) => false,
        }
    }

    /// Converts a reqwest error, dropping the request URL. The URL may carry the
    /// proxy API key.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchCause::Timeout
        } else if err.is_connect() {
            FetchCause::Connect(err.without_url().to_string())
        } else if let Some(status) = err.status() {
            FetchCause::Status(status.as_u16())
        } else {
            FetchCause::Other(err.without_url().to_string())
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to fetch page {page} for '{keyword}' after {attempts} attempt(s): {cause}")]
pub struct FetchError {
    pub keyword: String,
    pub page: u32,
    pub attempts: u32,
    pub cause: FetchCause,
}

/// A job card that could not be turned into a raw record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("card #{index} has no {field}")]
    MissingField { index: usize, field: &'static str },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl StoreError {
    pub(crate) fn classify(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint(msg.unwrap_or_else(|| code.to_string()))
            }
            rusqlite::Error::SqliteFailure(code, msg)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::CannotOpen
                ) =>
            {
                StoreError::Unavailable(msg.unwrap_or_else(|| code.to_string()))
            }
            other => StoreError::Database(other),
        }
    }
}
