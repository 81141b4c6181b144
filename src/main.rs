mod config;
mod crawler;
mod db;
mod error;
mod extract;
mod fetch;
mod ingest;
mod models;
mod normalize;
mod telemetry;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{CrawlConfig, CrawlOptions, DEFAULT_BASE_URL, DEFAULT_PROXY_ENDPOINT};
use crawler::{CrawlRequest, CrawlRunResult, Crawler, KeywordSummary};
use db::Database;
use fetch::Fetcher;
use ingest::JobStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "jobcrawl")]
#[command(about = "Crawl job listings from Saramin search results into a local database")]
struct Cli {
    /// Path to the SQLite database (defaults to $JOBCRAWL_DB or the user data dir)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Crawl search result pages for one or more keywords
    Crawl {
        /// Search keywords
        #[arg(required = true)]
        keywords: Vec<String>,

        /// Result pages to fetch per keyword
        #[arg(short, long, default_value = "5")]
        pages: u32,

        /// Maximum concurrent page fetches
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Per-request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,

        /// Retries for a failed page fetch
        #[arg(long, default_value = "1")]
        retries: u32,

        /// Fetch the site directly instead of through the scraping proxy
        #[arg(long)]
        no_proxy: bool,

        /// Site origin to search
        #[arg(long, default_value = DEFAULT_BASE_URL)]
        base_url: String,

        /// Scraping proxy endpoint
        #[arg(long, default_value = DEFAULT_PROXY_ENDPOINT)]
        proxy_endpoint: String,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored jobs
    List {
        /// Only jobs from this company (exact name)
        #[arg(short, long)]
        company: Option<String>,
    },

    /// Show job details
    Show {
        /// Job ID
        id: i64,
    },

    /// List companies and how many jobs each has
    Companies {
        /// Show a single company by exact name
        #[arg(short, long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);

    let db = Database::open(&config::database_path(cli.db))?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            if let Some(path) = db.path() {
                println!("Database initialized at {}", path.display());
            }
        }

        Commands::Crawl {
            keywords,
            pages,
            workers,
            timeout_secs,
            retries,
            no_proxy,
            base_url,
            proxy_endpoint,
            json,
        } => {
            let opts = CrawlOptions {
                base_url,
                use_proxy: !no_proxy,
                proxy_endpoint,
                timeout_secs,
                workers,
                retries,
            };
            let config = CrawlConfig::from_env(&opts)?;
            let request = CrawlRequest::new(keywords, pages);
            request.validate()?;

            db.init()?;
            let store = Arc::new(db);
            let fetcher = Fetcher::new(&config).context("Failed to build HTTP client")?;
            let crawler = Crawler::new(Arc::new(fetcher), store, config.workers);

            let token = crawler.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, finishing in-flight pages");
                    token.cancel();
                }
            });

            info!(proxy = config.proxy.is_some(), "crawl configured");
            let result = crawler.run(&request).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_summary(&result);
            }
        }

        Commands::List { company } => {
            db.ensure_initialized()?;
            let jobs = db.list_jobs(company.as_deref())?;
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!("{:<6} {:<34} {:<20} {:<14} {:>5}", "ID", "TITLE", "COMPANY", "DEADLINE", "SEEN");
                println!("{}", "-".repeat(83));
                for job in jobs {
                    println!(
                        "{:<6} {:<34} {:<20} {:<14} {:>5}",
                        job.id,
                        truncate(&job.title, 32),
                        truncate(&job.company_name, 18),
                        truncate(&job.deadline, 12),
                        job.sightings
                    );
                }
            }
        }

        Commands::Show { id } => {
            db.ensure_initialized()?;
            match db.get_job(id)? {
                Some(job) => {
                    println!("Job #{}", job.id);
                    println!("Title: {}", job.title);
                    println!("Company: {}", job.company_name);
                    let details = [
                        ("Link", &job.link),
                        ("Location", &job.location),
                        ("Experience", &job.experience),
                        ("Education", &job.education),
                        ("Employment", &job.employment_type),
                        ("Deadline", &job.deadline),
                        ("Sector", &job.sector),
                        ("Salary", &job.salary),
                    ];
                    for (label, value) in details {
                        if !value.is_empty() {
                            println!("{}: {}", label, value);
                        }
                    }
                    println!("Seen: {} time(s)", job.sightings);
                    println!("First seen: {}", job.created_at);
                    println!("Last seen: {}", job.updated_at);
                }
                None => {
                    println!("Job #{} not found.", id);
                }
            }
        }

        Commands::Companies { name: Some(name) } => {
            db.ensure_initialized()?;
            match db.find_company_by_name(&name).await? {
                Some(company) => {
                    println!("Company #{}", company.id);
                    println!("Name: {}", company.name);
                    if let Some(location) = &company.location {
                        println!("Location: {}", location);
                    }
                    if let Some(description) = &company.description {
                        println!("Description: {}", description);
                    }
                    let jobs = db.list_jobs(Some(&company.name))?;
                    if !jobs.is_empty() {
                        println!("\nJobs ({}):", jobs.len());
                        for job in jobs {
                            println!("  #{} - {}", job.id, job.title);
                        }
                    }
                }
                None => {
                    println!("Company '{}' not found.", name);
                }
            }
        }

        Commands::Companies { name: None } => {
            db.ensure_initialized()?;
            let companies = db.list_companies()?;
            if companies.is_empty() {
                println!("No companies found.");
            } else {
                println!("{:<6} {:<30} {:<24} {:>5}", "ID", "NAME", "LOCATION", "JOBS");
                println!("{}", "-".repeat(68));
                for (company, jobs) in companies {
                    println!(
                        "{:<6} {:<30} {:<24} {:>5}",
                        company.id,
                        truncate(&company.name, 28),
                        truncate(&company.location.unwrap_or_default(), 22),
                        jobs
                    );
                }
            }
        }
    }

    Ok(())
}

fn print_summary(result: &CrawlRunResult) {
    println!(
        "{:<20} {:>6} {:>6} {:>6} {:>8} {:>8} {:>8} {:>8}",
        "KEYWORD", "PAGES", "FAILED", "SKIP", "FOUND", "DROPPED", "WRITTEN", "ERRORS"
    );
    println!("{}", "-".repeat(78));
    for summary in &result.keywords {
        print_row(summary);
    }
    if result.keywords.len() > 1 {
        println!("{}", "-".repeat(78));
        print_row(&result.totals());
    }

    let totals = result.totals();
    println!(
        "\n{} new, {} updated in {:.1}s",
        totals.records_inserted,
        totals.records_updated,
        (result.finished_at - result.started_at).num_milliseconds() as f64 / 1000.0
    );
    if result.cancelled {
        println!("(Run interrupted - remaining pages were not fetched)");
    }
}

fn print_row(s: &KeywordSummary) {
    println!(
        "{:<20} {:>6} {:>6} {:>6} {:>8} {:>8} {:>8} {:>8}",
        truncate(&s.keyword, 18),
        s.pages_attempted,
        s.pages_failed,
        s.pages_skipped,
        s.records_extracted,
        s.records_skipped,
        s.records_written,
        s.records_failed
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("Acme", 10), "Acme");
        assert_eq!(truncate("백엔드 개발자 채용 공고", 8), "백엔드 개...");
    }

    #[test]
    fn test_cli_parses_crawl() {
        let cli = Cli::try_parse_from([
            "jobcrawl", "crawl", "python", "rust", "--pages", "2", "--workers", "3", "--no-proxy",
        ])
        .unwrap();
        match cli.command {
            Commands::Crawl { keywords, pages, workers, no_proxy, retries, .. } => {
                assert_eq!(keywords, vec!["python", "rust"]);
                assert_eq!(pages, 2);
                assert_eq!(workers, 3);
                assert_eq!(retries, 1);
                assert!(no_proxy);
            }
            _ => panic!("expected crawl command"),
        }
    }

    #[test]
    fn test_cli_requires_keywords() {
        assert!(Cli::try_parse_from(["jobcrawl", "crawl"]).is_err());
    }
}
