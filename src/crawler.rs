use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, FetchError};
use crate::extract::Extractor;
use crate::fetch::{PageFetcher, PageRequest};
use crate::ingest::{CompanyResolver, JobStore, JobWriter};
use crate::models::{JobCandidate, WriteOutcome};
use crate::normalize::normalize;

/// What the caller asks for: every keyword is searched on pages 1..=N.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub keywords: Vec<String>,
    pub pages_per_keyword: u32,
}

impl CrawlRequest {
    pub fn new<I, S>(keywords: I, pages_per_keyword: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            pages_per_keyword,
        }
    }

    /// Trimmed, de-duplicated keywords in their original order.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        if self.pages_per_keyword == 0 {
            return Err(ConfigError::NoPages);
        }
        let mut keywords: Vec<String> = Vec::new();
        for keyword in &self.keywords {
            let keyword = keyword.trim();
            if !keyword.is_empty() && !keywords.iter().any(|k| k == keyword) {
                keywords.push(keyword.to_string());
            }
        }
        if keywords.is_empty() {
            return Err(ConfigError::NoKeywords);
        }
        Ok(keywords)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordSummary {
    pub keyword: String,
    pub pages_attempted: usize,
    pub pages_failed: usize,
    /// Pages never fetched because the run was cancelled first.
    pub pages_skipped: usize,
    pub records_extracted: usize,
    pub records_skipped: usize,
    pub records_written: usize,
    pub records_inserted: usize,
    pub records_updated: usize,
    pub records_failed: usize,
}

impl KeywordSummary {
    fn new(keyword: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            ..Self::default()
        }
    }

    fn record(&mut self, report: &PageReport) {
        match &report.outcome {
            PageOutcome::Cancelled => {
                self.pages_skipped += 1;
                return;
            }
            PageOutcome::FetchFailed(_) => {
                self.pages_attempted += 1;
                self.pages_failed += 1;
            }
            PageOutcome::Processed => self.pages_attempted += 1,
        }

        for record in &report.records {
            if !matches!(record, RecordOutcome::Skipped(_)) {
                self.records_extracted += 1;
            }
            match record {
                RecordOutcome::Written(WriteOutcome::Inserted(_)) => {
                    self.records_written += 1;
                    self.records_inserted += 1;
                }
                RecordOutcome::Written(WriteOutcome::Updated(_)) => {
                    self.records_written += 1;
                    self.records_updated += 1;
                }
                RecordOutcome::Skipped(_) => self.records_skipped += 1,
                RecordOutcome::WriteFailed(_) => self.records_failed += 1,
            }
        }
    }

    fn absorb(&mut self, other: &KeywordSummary) {
        self.pages_attempted += other.pages_attempted;
        self.pages_failed += other.pages_failed;
        self.pages_skipped += other.pages_skipped;
        self.records_extracted += other.records_extracted;
        self.records_skipped += other.records_skipped;
        self.records_written += other.records_written;
        self.records_inserted += other.records_inserted;
        self.records_updated += other.records_updated;
        self.records_failed += other.records_failed;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlRunResult {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    /// Whether the run went through `Draining`, i.e. a cancellation arrived
    /// while pages were still queued or in flight.
    pub drained: bool,
    pub keywords: Vec<KeywordSummary>,
}

impl CrawlRunResult {
    pub fn totals(&self) -> KeywordSummary {
        let mut total = KeywordSummary::new("total");
        for summary in &self.keywords {
            total.absorb(summary);
        }
        total
    }

    pub fn keyword(&self, keyword: &str) -> Option<&KeywordSummary> {
        self.keywords.iter().find(|s| s.keyword == keyword)
    }
}

#[derive(Debug, Clone)]
pub enum PageOutcome {
    Processed,
    FetchFailed(FetchError),
    Cancelled,
}

#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Written(WriteOutcome),
    Skipped(String),
    WriteFailed(String),
}

#[derive(Debug, Clone)]
pub struct PageReport {
    pub keyword_index: usize,
    pub page: u32,
    pub outcome: PageOutcome,
    pub records: Vec<RecordOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    Idle,
    Running,
    Draining,
    Done,
}

/// Progress of a single (keyword, page) unit.
enum PageState {
    Crawling,
    Extracting(String),
    Failed(FetchError),
    Writing(Vec<JobCandidate>),
}

pub struct Crawler {
    fetcher: Arc<dyn PageFetcher>,
    extractor: Extractor,
    resolver: CompanyResolver,
    writer: JobWriter,
    workers: usize,
    cancel: CancellationToken,
    state: watch::Sender<RunState>,
}

impl Crawler {
    pub fn new(fetcher: Arc<dyn PageFetcher>, store: Arc<dyn JobStore>, workers: usize) -> Self {
        Self {
            fetcher,
            extractor: Extractor::default(),
            resolver: CompanyResolver::new(store.clone()),
            writer: JobWriter::new(store),
            workers,
            cancel: CancellationToken::new(),
            state: watch::Sender::new(RunState::Idle),
        }
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Cancelling this token stops new page fetches. Pages already in flight
    /// still finish and write their records.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Follows the run-level state: `Idle`, `Running`, `Draining` once a
    /// cancellation is seen, then `Done`.
    pub fn state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub async fn run(&self, request: &CrawlRequest) -> Result<CrawlRunResult, ConfigError> {
        let keywords = request.validate()?;
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        let started_at = Utc::now();
        let pages = request.pages_per_keyword;
        let mut summaries: Vec<KeywordSummary> =
            keywords.iter().map(|k| KeywordSummary::new(k)).collect();

        let units = keywords.iter().enumerate().flat_map(|(index, keyword)| {
            (1..=pages).map(move |page| (index, PageRequest::new(keyword.as_str(), page)))
        });

        info!(
            keywords = keywords.len(),
            pages,
            workers = self.workers,
            "starting crawl"
        );
        self.transition(RunState::Running);

        let mut reports = stream::iter(units)
            .map(|(index, request)| self.crawl_page(index, request))
            .buffer_unordered(self.workers);

        while let Some(report) = reports.next().await {
            debug!(
                keyword = %summaries[report.keyword_index].keyword,
                page = report.page,
                records = report.records.len(),
                "page report"
            );
            summaries[report.keyword_index].record(&report);
            if self.cancel.is_cancelled() && *self.state.borrow() == RunState::Running {
                self.transition(RunState::Draining);
            }
        }

        for summary in &summaries {
            info!(
                keyword = %summary.keyword,
                pages_attempted = summary.pages_attempted,
                pages_failed = summary.pages_failed,
                records_written = summary.records_written,
                records_failed = summary.records_failed,
                "keyword finished"
            );
        }
        let drained = *self.state.borrow() == RunState::Draining;
        self.transition(RunState::Done);

        Ok(CrawlRunResult {
            started_at,
            finished_at: Utc::now(),
            cancelled: self.cancel.is_cancelled(),
            drained,
            keywords: summaries,
        })
    }

    fn transition(&self, to: RunState) {
        let from = self.state.send_replace(to);
        debug!(?from, ?to, "crawl state");
        if to == RunState::Draining {
            info!("cancellation requested, draining in-flight pages");
        }
    }

    async fn crawl_page(&self, keyword_index: usize, request: PageRequest) -> PageReport {
        let mut records = Vec::new();

        if self.cancel.is_cancelled() {
            debug!(keyword = %request.keyword, page = request.page, "skipping page, crawl cancelled");
            return PageReport {
                keyword_index,
                page: request.page,
                outcome: PageOutcome::Cancelled,
                records,
            };
        }

        let mut state = PageState::Crawling;
        loop {
            state = match state {
                PageState::Crawling => match self.fetcher.fetch(&request).await {
                    Ok(html) => PageState::Extracting(html),
                    Err(err) => PageState::Failed(err),
                },
                PageState::Extracting(html) => {
                    PageState::Writing(self.extract_candidates(&request, &html, &mut records))
                }
                PageState::Failed(err) => {
                    warn!(
                        keyword = %request.keyword,
                        page = request.page,
                        error = %err.cause,
                        "page failed"
                    );
                    return PageReport {
                        keyword_index,
                        page: request.page,
                        outcome: PageOutcome::FetchFailed(err),
                        records,
                    };
                }
                PageState::Writing(candidates) => {
                    for candidate in &candidates {
                        records.push(self.store_record(candidate).await);
                    }
                    info!(
                        keyword = %request.keyword,
                        page = request.page,
                        records = records.len(),
                        "page crawled"
                    );
                    return PageReport {
                        keyword_index,
                        page: request.page,
                        outcome: PageOutcome::Processed,
                        records,
                    };
                }
            };
        }
    }

    /// Extraction and normalization are synchronous so the parsed document
    /// never lives across an await point.
    fn extract_candidates(
        &self,
        request: &PageRequest,
        html: &str,
        records: &mut Vec<RecordOutcome>,
    ) -> Vec<JobCandidate> {
        let mut candidates = Vec::new();
        for result in self.extractor.extract(html) {
            let outcome = result
                .map_err(|e| e.to_string())
                .and_then(|raw| normalize(raw, self.fetcher.base_url()).map_err(|e| e.to_string()));
            match outcome {
                Ok(candidate) => candidates.push(candidate),
                Err(reason) => {
                    debug!(keyword = %request.keyword, page = request.page, %reason, "skipping card");
                    records.push(RecordOutcome::Skipped(reason));
                }
            }
        }
        candidates
    }

    async fn store_record(&self, candidate: &JobCandidate) -> RecordOutcome {
        let company_id = match self
            .resolver
            .resolve(candidate.company(), &candidate.company_fields())
            .await
        {
            Ok(id) => id,
            Err(err) => {
                warn!(company = candidate.company(), error = %err, "company upsert failed");
                return RecordOutcome::WriteFailed(err.to_string());
            }
        };

        match self.writer.write(candidate, company_id).await {
            Ok(outcome) => {
                debug!(id = outcome.id(), title = candidate.title(), "job stored");
                RecordOutcome::Written(outcome)
            }
            Err(err) => {
                warn!(
                    title = candidate.title(),
                    company = candidate.company(),
                    error = %err,
                    "job upsert failed"
                );
                RecordOutcome::WriteFailed(err.to_string())
            }
        }
    }
}
