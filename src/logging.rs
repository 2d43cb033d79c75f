// Logging
// Engine log levels on top of the `log` facade, plus the stderr logger the
// command line tool installs.

use std::io::Write;

use clap::ValueEnum;
use log::{LevelFilter, Log, Metadata, Record};

/// Engine log levels, most quiet first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, ValueEnum)]
pub enum LogLevel {
    Nothing,
    User,
    Error,
    #[default]
    Warning,
    Info,
    Debug,
    All,
}

impl LogLevel {
    /// Create a LogLevel from its numeric form, out of range values mean Info
    pub fn from_i32(level: i32) -> Self {
        match level {
            0 => LogLevel::Nothing,
            1 => LogLevel::User,
            2 => LogLevel::Error,
            3 => LogLevel::Warning,
            4 => LogLevel::Info,
            5 => LogLevel::Debug,
            6 => LogLevel::All,
            _ => LogLevel::Info,
        }
    }

    /// Matching `log` filter. `User` messages are logged at error level.
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Nothing => LevelFilter::Off,
            LogLevel::User | LogLevel::Error => LevelFilter::Error,
            LogLevel::Warning => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::All => LevelFilter::Trace,
        }
    }
}

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut stderr = std::io::stderr().lock();
        // Nowhere left to report a failed write to stderr
        let _ = writeln!(
            stderr,
            "[{:<5}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: StderrLogger = StderrLogger;

/// Install the stderr logger. Calling it again only changes the level.
pub fn init(level: LogLevel) {
    if log::set_logger(&LOGGER).is_err() {
        log::debug!("Logger already installed, updating level only");
    }
    log::set_max_level(level.to_level_filter());
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serial_test::serial;

    #[test]
    fn test_log_level_from_i32() {
        assert_eq!(LogLevel::from_i32(0), LogLevel::Nothing);
        assert_eq!(LogLevel::from_i32(1), LogLevel::User);
        assert_eq!(LogLevel::from_i32(2), LogLevel::Error);
        assert_eq!(LogLevel::from_i32(3), LogLevel::Warning);
        assert_eq!(LogLevel::from_i32(4), LogLevel::Info);
        assert_eq!(LogLevel::from_i32(5), LogLevel::Debug);
        assert_eq!(LogLevel::from_i32(6), LogLevel::All);
    }

    #[test]
    fn test_log_level_invalid() {
        // Invalid values should default to Info
        assert_eq!(LogLevel::from_i32(100), LogLevel::Info);
        assert_eq!(LogLevel::from_i32(-1), LogLevel::Info);
    }

    #[rstest]
    #[case(LogLevel::Nothing, LevelFilter::Off)]
    #[case(LogLevel::User, LevelFilter::Error)]
    #[case(LogLevel::Error, LevelFilter::Error)]
    #[case(LogLevel::Warning, LevelFilter::Warn)]
    #[case(LogLevel::Info, LevelFilter::Info)]
    #[case(LogLevel::Debug, LevelFilter::Debug)]
    #[case(LogLevel::All, LevelFilter::Trace)]
    fn test_level_filter_mapping(#[case] level: LogLevel, #[case] filter: LevelFilter) {
        assert_eq!(level.to_level_filter(), filter);
    }

    #[test]
    fn test_level_names_parse() {
        assert_eq!(LogLevel::from_str("debug", true), Ok(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("NOTHING", true), Ok(LogLevel::Nothing));
        assert!(LogLevel::from_str("verbose", true).is_err());
        assert_eq!(LogLevel::default(), LogLevel::Warning);
    }

    #[test]
    #[serial]
    fn test_init_twice() {
        init(LogLevel::Warning);
        init(LogLevel::Debug);
        assert_eq!(log::max_level(), LevelFilter::Debug);
        log::debug!("logger smoke test");
    }
}
