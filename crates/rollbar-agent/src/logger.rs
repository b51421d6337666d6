//! Tracing formatter for the agent's own diagnostics.
//!
//! Prefixes every line with `ROLLBAR_AGENT` so the agent's internal logging
//! is easy to separate from application logs:
//!
//! ```text
//! ROLLBAR_AGENT | WARN | payload queue full, dropping oldest payload
//! ROLLBAR_AGENT | DEBUG | dispatch{token=abc}: rate limited by server, deferring queue
//! ```
//!
//! Wire it into a subscriber the usual way:
//!
//! ```rust,ignore
//! use tracing_subscriber::FmtSubscriber;
//! use rollbar_agent::logger::Formatter;
//!
//! let subscriber = FmtSubscriber::builder()
//!     .event_format(Formatter)
//!     .with_max_level(tracing::Level::DEBUG)
//!     .finish();
//! tracing::subscriber::set_global_default(subscriber)?;
//! ```

use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

/// Event formatter emitting `ROLLBAR_AGENT | LEVEL | spans: message`.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "ROLLBAR_AGENT | {} | ", metadata.level())?;

        // Include the active span hierarchy, root first, with its fields.
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
