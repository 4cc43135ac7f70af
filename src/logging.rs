use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Diagnostics go to stderr so stdout stays reserved for progress lines.
pub fn init() {
    let filter = match std::env::var("MESSAGEHUB_LOG") {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .parse_lossy(directives),
        _ => EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .from_env_lossy(),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}
