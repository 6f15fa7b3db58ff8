//! Console logger layer.

use std::fmt::{self, Debug, Display, Formatter, Write};
use std::io::IsTerminal;

use chrono::Local;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::metadata::LevelFilter;
use tracing::subscriber::{set_global_default, SetGlobalDefaultError};
use tracing::{Event, Level, Metadata, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Installs the [`Logger`] as the global default subscriber.
///
/// Returns an error if a global subscriber was already installed.
pub fn init() -> Result<(), SetGlobalDefaultError> {
    let subscriber = tracing_subscriber::registry().with(Logger::new());
    set_global_default(subscriber)
}

/// A [`Layer`] that writes events to stdout.
///
/// The maximum level is read from the `RUST_LOG` environment variable and defaults to `INFO`.
#[derive(Debug)]
pub struct Logger {
    is_tty: bool,
    level: LevelFilter,
    // Serializes lines written by queue worker threads and the main thread.
    stdout: Mutex<()>,
}

impl Logger {
    pub fn new() -> Self {
        let level = std::env::var("RUST_LOG")
            .map(|e| parse_level(&e))
            .unwrap_or(LevelFilter::INFO);

        Self::with_level(level)
    }

    pub fn with_level(level: LevelFilter) -> Self {
        Self {
            is_tty: std::io::stdout().is_terminal(),
            level,
            stdout: Mutex::new(()),
        }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    fn log<T>(&self, meta: &Metadata<'_>, content: T)
    where
        T: Display,
    {
        if *meta.level() > self.level {
            return;
        }

        let now = Local::now().format("%Y-%m-%d %H:%M:%S:%f");
        let target = meta.module_path().unwrap_or("???");
        let thread = std::thread::current();
        let thread = thread.name().unwrap_or("<unnamed>");

        let (level, color) = match *meta.level() {
            Level::ERROR => ("ERROR", Color::RED),
            Level::WARN => ("WARN", Color::YELLOW),
            Level::INFO => ("INFO", Color::GREEN),
            Level::DEBUG => ("DEBUG", Color::LIGHT_GRAY_BOLD),
            Level::TRACE => ("TRACE", Color::LIGHT_GRAY_BOLD),
        };

        let _guard = self.stdout.lock();
        if self.is_tty {
            let now = ColorText::new(format!("[{}]", now), Color::LIGHT_GRAY);
            let level = ColorText::new(level, color);
            let target = ColorText::new(target, Color::LIGHT_GRAY);

            println!("{} {} [{}] {} {}", now, level, thread, target, content);
        } else {
            println!("[{}] {} [{}] {} {}", now, level, thread, target, content);
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for Logger
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        *metadata.level() <= self.level
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() > self.level {
            return;
        }

        let mut visitor = Visitor::new();
        event.record(&mut visitor);

        self.log(event.metadata(), visitor);
    }
}

fn parse_level(s: &str) -> LevelFilter {
    match s {
        "error" | "ERROR" => LevelFilter::ERROR,
        "warn" | "WARN" => LevelFilter::WARN,
        "info" | "INFO" => LevelFilter::INFO,
        "debug" | "DEBUG" => LevelFilter::DEBUG,
        "trace" | "TRACE" => LevelFilter::TRACE,
        "off" | "OFF" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

struct Visitor {
    buf: String,
}

impl Visitor {
    fn new() -> Self {
        Self {
            buf: String::with_capacity(32),
        }
    }
}

impl Visit for Visitor {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if !self.buf.is_empty() {
            self.buf.push_str(", ");
        }

        let _ = match field.name() {
            "message" => write!(self.buf, "{:?}", value),
            _ => write!(self.buf, "{} = {:?}", field, value),
        };
    }
}

impl Display for Visitor {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.buf, f)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct Color([u8; 2]);

impl Color {
    // Bold
    pub const RED: Self = Self([1, 31]);
    pub const YELLOW: Self = Self([1, 33]);
    pub const GREEN: Self = Self([1, 32]);
    pub const LIGHT_GRAY_BOLD: Self = Self([1, 37]);

    pub const LIGHT_GRAY: Self = Self([2, 37]);
}

struct ColorText<T>
where
    T: Display,
{
    text: T,
    color: Color,
}

impl<T> ColorText<T>
where
    T: Display,
{
    fn new(text: T, color: Color) -> Self {
        Self { text, color }
    }
}

impl<T> Display for ColorText<T>
where
    T: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\x1b[{};{}m{}\x1b[0m",
            self.color.0[0], self.color.0[1], self.text
        )
    }
}

#[cfg(test)]
mod tests {
    use tracing::metadata::LevelFilter;

    use super::{parse_level, Logger};

    #[test]
    fn parse_log_levels() {
        assert_eq!(parse_level("error"), LevelFilter::ERROR);
        assert_eq!(parse_level("WARN"), LevelFilter::WARN);
        assert_eq!(parse_level("debug"), LevelFilter::DEBUG);
        assert_eq!(parse_level("off"), LevelFilter::OFF);
        assert_eq!(parse_level("verbose"), LevelFilter::INFO);
    }

    #[test]
    fn logger_with_level() {
        let logger = Logger::with_level(LevelFilter::WARN);
        assert_eq!(logger.level(), LevelFilter::WARN);
    }
}
