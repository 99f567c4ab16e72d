use indicatif::ProgressStyle;
use indicatif::style::TemplateError;

/// Style of the bar tracking a whole plan run.
pub(crate) fn progress_style() -> Result<ProgressStyle, TemplateError> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
        .progress_chars("=>-"))
}

/// Style of a single running node, a spinner with no progress.
pub(crate) fn task_style() -> Result<ProgressStyle, TemplateError> {
    ProgressStyle::with_template("{spinner:.blue} {msg}")
}

/// Installs a global subscriber printing to stderr, with progress bars for
/// the `executing_plan` and `node` spans.
///
/// The filter is read from `RUST_LOG` and defaults to `info`. Calling this
/// more than once, or after another subscriber was set, does nothing.
#[cfg(feature = "logging")]
pub fn init_logging() {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let indicatif = IndicatifLayer::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .try_init();
}
