use tracing::level_filters::LevelFilter;

/// Installs the global `tracing` subscriber.
///
/// `verbose` raises the default level (0 = info, 1 = debug, 2+ = trace);
/// `RUST_LOG` still takes precedence per target.
pub fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(filter.into())
        .from_env_lossy();
    // Drugi init (np. w testach) jest ignorowany
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}
