use alloc::format;

use crate::sync::InitCell;

/// Write-string function provided by the terminal/serial driver.
pub type LogSink = fn(&str);

/// Dummy type to help us implement a logger using the `log` crate.
struct Logger;

static LOGGER: Logger = Logger;

static SINK: InitCell<LogSink> = InitCell::new();

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(sink) = SINK.get() {
            sink(&format!("[{}] {}\n", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

/// Routes the `log` macros to `sink`. Only the first call takes effect; later
/// calls return an error and leave the existing logger alone.
pub fn init(sink: LogSink, level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER)?;
    // set_logger only succeeds once, so the sink cannot already be set.
    let _ = SINK.init(sink);
    log::set_max_level(level);
    log::debug!("Logging initialized");
    Ok(())
}
