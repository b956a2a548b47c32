//! A tiny stderr backend for the `log` facade, for the demo binary.
//! The library itself only logs through the facade and never installs anything.

use std::{
    env,
    io::{self, Write},
    str::FromStr,
};

use log::{LevelFilter, Log, Metadata, Record};

/// Environment variable with the level filter: `off`, `error`, ..., `trace`
pub const LOG_ENV: &str = "FAIRLOCK_LOG";
const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Info;

pub struct StderrLogger {
    filter: LevelFilter,
}

impl StderrLogger {
    pub fn new(filter: LevelFilter) -> Self {
        Self { filter }
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.filter
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let thread = std::thread::current();
        // nowhere to report a failed log write to
        let _ = writeln!(
            io::stderr().lock(),
            "[{} {} {}] {}",
            record.level(),
            thread.name().unwrap_or("-"),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

fn level_from(value: Option<&str>) -> Result<LevelFilter, String> {
    match value {
        None => Ok(DEFAULT_LOG_LEVEL),
        Some(v) => LevelFilter::from_str(v).map_err(|e| format!("{LOG_ENV}={v}: {e}")),
    }
}

/// Installs [`StderrLogger`] with the level from [`LOG_ENV`]
pub fn init() -> Result<(), String> {
    let filter = level_from(env::var(LOG_ENV).ok().as_deref())?;
    log::set_boxed_logger(Box::new(StderrLogger::new(filter))).map_err(|e| e.to_string())?;
    log::set_max_level(filter);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn levels() {
        assert_eq!(Ok(LevelFilter::Info), level_from(None));
        assert_eq!(Ok(LevelFilter::Trace), level_from(Some("trace")));
        assert_eq!(Ok(LevelFilter::Off), level_from(Some("OFF")));
        assert!(level_from(Some("loud")).is_err());
    }

    #[test]
    fn filter() {
        let logger = StderrLogger::new(LevelFilter::Warn);
        let warn = Metadata::builder().level(log::Level::Warn).build();
        let debug = Metadata::builder().level(log::Level::Debug).build();
        assert!(logger.enabled(&warn));
        assert!(!logger.enabled(&debug));
    }
}
