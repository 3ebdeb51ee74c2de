use crate::common::config::LoggerConfig;
use log::{info, LevelFilter};
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        rolling_file::{
            policy::compound::{
                roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
            },
            RollingFileAppender,
        },
    },
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};
use std::fs;
use std::path::Path;
use std::str::FromStr;

const PATTERN: &str = "[{l}] {d(%Y-%m-%d %H:%M:%S)} {P} {T} - {t} : {m}{n}";

/// Fallback logger that writes to stderr when log4rs fails to initialise.
pub struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {} - {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

pub fn parse_level(level: &str) -> LevelFilter {
    LevelFilter::from_str(level).unwrap_or(LevelFilter::Info)
}

/// Console output always; a size-rolled log file as well when `path` is set.
pub fn setup_logger(config: LoggerConfig) -> Result<log4rs::Handle, Box<dyn std::error::Error>> {
    let level = parse_level(&config.level);

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();

    let mut builder = Config::builder().appender(
        Appender::builder()
            .filter(Box::new(ThresholdFilter::new(level)))
            .build("stderr", Box::new(stderr)),
    );
    let mut root = Root::builder().appender("stderr");

    if !config.path.is_empty() {
        let trigger = SizeTrigger::new(config.file_size * 1024 * 1024);
        let roller = FixedWindowRoller::builder()
            .base(0)
            .build(&config.archive_pattern, config.file_count)?;
        let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));

        if let Some(parent) = Path::new(&config.path).parent() {
            fs::create_dir_all(parent)?;
        }

        let logfile = RollingFileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(PATTERN)))
            .build(&config.path, Box::new(policy))?;

        builder = builder.appender(Appender::builder().build("logfile", Box::new(logfile)));
        root = root.appender("logfile");
    }

    let handle = log4rs::init_config(builder.build(root.build(level))?)?;

    info!("Logger initialized ({})", level);
    if !config.path.is_empty() {
        info!(
            "Log file: '{}', archive: '{}'",
            config.path, config.archive_pattern
        );
    }

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level("Info"), LevelFilter::Info);
        assert_eq!(parse_level("TRACE"), LevelFilter::Trace);
        assert_eq!(parse_level("loud"), LevelFilter::Info);
    }
}
