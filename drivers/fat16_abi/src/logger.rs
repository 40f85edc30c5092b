use std::fmt::Display;
use std::io::{IsTerminal, Write};

use log::{Level, LevelFilter, Log};
use owo_colors::OwoColorize;

struct Inner {
    color: bool,
}

impl Inner {
    fn write_with_color(&self, out: &mut impl Write, color: Color, string: impl Display) {
        if !self.color {
            let _ = write!(out, "{string}");
            return;
        }
        let string: &dyn Display = match color {
            Color::Default => &string,
            Color::Gray => &string.dimmed(),
            Color::BrightRed => &string.bright_red(),
            Color::BrightYellow => &string.bright_yellow(),
            Color::BrightBlue => &string.bright_blue(),
            Color::BrightCyan => &string.bright_cyan(),
            Color::BrightMagenta => &string.bright_magenta(),
        };
        let _ = write!(out, "{string}");
    }
}

struct StderrLogger {
    inner: spin::Mutex<Inner>,
}

static LOGGER: StderrLogger = StderrLogger {
    inner: spin::Mutex::new(Inner { color: false }),
};

impl Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let inner = self.inner.lock();
        let mut out = std::io::stderr().lock();
        let level = record.level();
        inner.write_with_color(
            &mut out,
            match level {
                Level::Error => Color::BrightRed,
                Level::Warn => Color::BrightYellow,
                Level::Info => Color::BrightBlue,
                Level::Debug => Color::BrightCyan,
                Level::Trace => Color::BrightMagenta,
            },
            format_args!("{level:5} "),
        );
        inner.write_with_color(&mut out, Color::Gray, format_args!("[{}] ", record.target()));
        inner.write_with_color(&mut out, Color::Default, record.args());
        inner.write_with_color(&mut out, Color::Default, "\n");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Install the stderr logger. Fails if the host process already set one.
pub fn init(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    LOGGER.inner.lock().color = std::io::stderr().is_terminal();
    log::set_max_level(level);
    log::set_logger(&LOGGER)
}

enum Color {
    Default,
    Gray,
    BrightRed,
    BrightYellow,
    BrightBlue,
    BrightCyan,
    BrightMagenta,
}
