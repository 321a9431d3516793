use colored::*;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

/// Event formatter for the user-facing stdout layer.
///
/// Prints the bare message colored by severity, without timestamps or
/// level tags; the detailed layer carries those to the log file.
pub struct StatusLineFormatter;

impl<S, N> FormatEvent<S, N> for StatusLineFormatter
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
        // Render the fields into a buffer so the whole line can be colored.
        let mut line = String::new();
        let mut line_writer = Writer::new(&mut line);
        ctx.format_fields(line_writer.by_ref(), event)?;

        let colored_line = match *event.metadata().level() {
            Level::ERROR => line.red().bold(),
            Level::WARN => line.yellow(),
            Level::INFO => line.normal(),
            Level::DEBUG => line.cyan(),
            Level::TRACE => line.dimmed(),
        };

        writeln!(writer, "{}", colored_line)
    }
}
