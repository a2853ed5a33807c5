//! Generic logging facility with a default implementation.
//!
//! This is the user-facing diagnostic channel (the `make: LEVEL | msg` lines GNU make itself
//! prints). Internal engine tracing enabled by `-d`/`--debug-log` goes through the `log` crate
//! instead (see [`init_debug_log`]) so it can be filtered/redirected independently of the messages
//! a user actually asked for.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::context::Context;

pub const INFO: &str = "INFO";
pub const WARN: &str = "WARN";
pub const ERROR: &str = "ERROR";

const MAX_SEVERITY_LENGTH: usize = 5;

/// Generic trait any logger must implement.
pub trait Logger {
    /// Write the message somewhere.
    fn write(&self, msg: String);

    /// Log an `INFO` message.
    fn info(&self, msg: impl AsRef<str>, context: Option<&Context>) {
        self.write(self.format_log(INFO, msg, context));
    }

    /// Log a `WARN` message.
    fn warn(&self, msg: impl AsRef<str>, context: Option<&Context>) {
        self.write(self.format_log(WARN, msg, context));
    }

    /// Log an `ERROR` message.
    fn error(&self, msg: impl AsRef<str>, context: Option<&Context>) {
        self.write(self.format_log(ERROR, msg, context));
    }

    /// Clones this logger behind a fresh box. Needed because the restart protocol builds
    /// a brand new `Makefile` (and therefore a brand new boxed `Logger`) on every pass.
    fn boxed_clone(&self) -> Box<dyn Logger>;

    /// Formatter for all log messages.
    fn format_log(&self, level: &str, msg: impl AsRef<str>, context: Option<&Context>) -> String {
        // Format log level and context label/line.
        let level_display = format!("{:0width$}", level, width = MAX_SEVERITY_LENGTH);
        let context_label = context
            .and_then(|c| c.label())
            .map(|l| format!("[{}] ", l))
            .unwrap_or_default();

        // Only show the context line if we are logging warnings or errors.
        let context_line = if level == "WARN" || level == "ERROR" {
            context
                .and_then(|c| c.display_line())
                .map(|l| format!("\n{}", l))
                .unwrap_or_default()
        } else {
            String::new()
        };

        // Return the formatted message.
        format!(
            "make: {level_display} {context_label}| {}{}",
            msg.as_ref(),
            context_line
        )
    }
}

/// Uses the default implementation and outputs to `stderr`.
pub struct DefaultLogger {}

/// By default, print to `stderr`.
impl Logger for DefaultLogger {
    fn write(&self, msg: String) {
        eprintln!("{}", msg);
    }

    fn boxed_clone(&self) -> Box<dyn Logger> {
        Box::new(DefaultLogger {})
    }
}

/// A logger that discards everything; used under `-s`/`--silent` for messages that would
/// otherwise be informational noise.
pub struct NullLogger {}

impl Logger for NullLogger {
    fn write(&self, _msg: String) {}

    fn boxed_clone(&self) -> Box<dyn Logger> {
        Box::new(NullLogger {})
    }
}

/// A `log::Log` implementation that writes to a file instead of stderr, used when
/// `--debug-log PATH` is given. Plain stderr writes under `env_logger` already cover the
/// no-path case.
struct FileLog {
    file: Mutex<File>,
}

impl log::Log for FileLog {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{} {}", record.level(), record.args());
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Initialize the internal `log`-crate debug channel. `verbose` corresponds to `-d`; `path`
/// corresponds to `--debug-log PATH`. Mirrors `make.py`'s
/// `logging.basicConfig(level=..., filename=...)` call.
pub fn init_debug_log(verbose: bool, path: Option<&Path>) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };

    match path {
        Some(path) => {
            if let Ok(file) = File::create(path) {
                let logger = FileLog {
                    file: Mutex::new(file),
                };
                if log::set_boxed_logger(Box::new(logger)).is_ok() {
                    log::set_max_level(level);
                }
            }
        }
        None => {
            let _ = env_logger::Builder::new()
                .filter_level(level)
                .format_timestamp(None)
                .try_init();
        }
    }
}
