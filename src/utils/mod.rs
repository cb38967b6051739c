//! Logging setup for the command line.
//!
//! Every user-facing line is a `tracing` event. Errors and warnings go to
//! stderr with a `[CRITICAL] ` / `[WARNING] ` prefix, everything else goes
//! to stdout as bare text.

use std::fmt;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::core::config::Verbosity;

/// Overrides the verbosity-derived filter, e.g. `BACKUP_LOG=backup=trace`.
pub const LOG_ENV: &str = "BACKUP_LOG";

/// Prints only the message, prefixed by severity for errors and warnings.
pub struct SeverityFormat;

impl<S, N> FormatEvent<S, N> for SeverityFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        match *event.metadata().level() {
            Level::ERROR => write!(writer, "[CRITICAL] ")?,
            Level::WARN => write!(writer, "[WARNING] ")?,
            _ => {}
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

pub fn filter_directive(verbosity: Verbosity) -> String {
    let level = match verbosity {
        Verbosity::Quiet => "error",
        Verbosity::Normal => "info",
        Verbosity::Verbose => "trace",
    };
    format!("backup={level}")
}

/// Initialize logging for the given verbosity tier
pub fn init_logging(verbosity: Verbosity) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(filter_directive(verbosity)))?;
    let writer = std::io::stderr
        .with_max_level(Level::WARN)
        .or_else(std::io::stdout);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(SeverityFormat)
                .with_writer(writer),
        )
        .try_init()?;

    Ok(())
}
