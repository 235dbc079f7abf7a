use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, filter::Targets, fmt, prelude::*};

/// Sends `xfund` events to stderr, at DEBUG when verbose and WARN otherwise.
/// A set `RUST_LOG` takes over the default directive.
pub fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let fund_targets = Targets::new().with_target("xfund", level);
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(fund_targets)
        .with(env_filter)
        .init();
}
