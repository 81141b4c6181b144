use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Structured logs go to stderr so tables and JSON on stdout stay clean.
pub fn init(verbose: bool) {
    let default_filter = if verbose {
        "info,jobcrawl=debug"
    } else {
        "warn,jobcrawl=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
