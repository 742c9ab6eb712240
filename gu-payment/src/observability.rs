//! Structured logging setup.
//!
//! Every lifecycle, invoice and gateway operation in this crate is instrumented with
//! [`tracing`]; this module installs a subscriber for applications that do not bring their own.

use std::io;

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::{PaymentError, Result};

/// Log format configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable pretty format for development.
    #[default]
    Pretty,
    /// JSON format for production log aggregation.
    Json,
}

impl LogFormat {
    /// Determines log format from the `LOG_FORMAT` environment variable.
    ///
    /// `json` selects [`LogFormat::Json`]; anything else, or an unset variable, selects
    /// [`LogFormat::Pretty`].
    #[must_use]
    pub fn from_env() -> Self {
        Self::parse(&std::env::var("LOG_FORMAT").unwrap_or_default())
    }

    /// Parses a format name, case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") { Self::Json } else { Self::Pretty }
    }
}

/// Installs a global `tracing` subscriber.
///
/// Configures tracing-subscriber with:
/// - the requested output format
/// - `RUST_LOG` filtering (default: `info`)
/// - span close events, so each remote operation logs its duration
///
/// # Errors
///
/// Returns [`PaymentError::Config`] if a global subscriber is already installed.
///
/// # Examples
///
/// ```no_run
/// use gu_payment::observability::{LogFormat, init_observability};
///
/// init_observability(LogFormat::from_env()).expect("subscriber already installed");
/// ```
pub fn init_observability(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(io::stderr),
            )
            .try_init(),
    };

    installed.map_err(|e| PaymentError::Config(format!("cannot install tracing subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(""), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("unknown"), LogFormat::Pretty);
    }

    #[test]
    fn test_second_init_is_rejected() {
        // The first call may race with other tests installing a subscriber; only the
        // second outcome is deterministic.
        let _ = init_observability(LogFormat::Pretty);
        let second = init_observability(LogFormat::Json);
        assert!(matches!(second, Err(PaymentError::Config(_))));
    }
}
