use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, instrument, span, trace, warn, Level, Span};

/// Initialize the tracing system
///
/// Honours `RUST_LOG` and falls back to `info`. Output goes to stderr in the
/// compact format; ANSI colours are only used on a terminal.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(is_tty())
        .compact()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Check if we're running in a TTY environment
fn is_tty() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stderr())
}

/// Span covering one connection of the push stream
pub fn stream_span(channel: &str, attempt: u32) -> Span {
    span!(Level::INFO, "stream", channel = %channel, attempt = %attempt)
}

/// Span covering the handling of a single message
pub fn message_span(message_type: &str, task_id: Option<&str>) -> Span {
    span!(
        Level::DEBUG,
        "message",
        message_type = %message_type,
        task_id = task_id.unwrap_or("")
    )
}

/// Span covering one tick of the object-store poller
pub fn poll_span(pending: usize) -> Span {
    span!(Level::DEBUG, "poll", pending = %pending)
}
