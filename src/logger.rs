//! `log4rs` setup for the adapter.
//!
//! Records are emitted through the `log` facade. Two categories are routed to files:
//! the root (`app.log`) and `nexus_adapter::audit` (`audit.log`), which receives one line per
//! executed envelope.

use log::LevelFilter;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::{Path, PathBuf};

/// Log target for per-envelope audit lines.
pub const AUDIT_TARGET: &str = "nexus_adapter::audit";

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const ROLL_SIZE: u64 = 10 * 1024 * 1024;

/// Initializes the logging system from `log4rs.yaml` in the working directory.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    init_path(Path::new("log4rs.yaml"))
}

/// Initializes the logging system from a specific config file path.
pub fn init_path(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    log4rs::init_file(path, log4rs::config::Deserializers::default())?;
    Ok(())
}

fn parse_level(level: Option<&str>) -> LevelFilter {
    match level.unwrap_or("info").to_ascii_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

fn rolling(base: &Path, stem: &str, keep: u32) -> Result<RollingFileAppender, Box<dyn std::error::Error>> {
    let roller = FixedWindowRoller::builder()
        .build(&format!("{}", base.join(format!("{stem}.{{}}.log")).display()), keep)?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE)), Box::new(roller));
    Ok(RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(base.join(format!("{stem}.log")), Box::new(policy))?)
}

/// Configure logging globally for the process.
/// - dir: base directory for logs; if None, current directory.
/// - level: error|warn|info|debug|trace|off
/// - retention: number of rolled files to keep (default 7)
///
/// A logger that is already installed is left in place; the log files are still created.
///
/// # Errors
/// Returns an error if the directory or appenders cannot be created.
pub fn configure_logging(
    dir: Option<&Path>,
    level: Option<&str>,
    retention: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let base = dir
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    std::fs::create_dir_all(&base)?;
    let keep = u32::try_from(retention.unwrap_or(7)).unwrap_or(u32::MAX);
    let lvl = parse_level(level);

    let config = Config::builder()
        .appender(Appender::builder().build("app", Box::new(rolling(&base, "app", keep)?)))
        .appender(Appender::builder().build("audit", Box::new(rolling(&base, "audit", keep)?)))
        .logger(Logger::builder().appender("audit").additive(false).build(AUDIT_TARGET, lvl))
        .build(Root::builder().appender("app").build(lvl))?;
    if log4rs::init_config(config).is_err() {
        log::debug!("logger already installed; keeping existing configuration");
    }
    Ok(())
}

/// Configure logging from environment variables if present:
/// - NEXUS_ADAPTER_LOG_DIR
/// - NEXUS_ADAPTER_LOG_LEVEL
/// - NEXUS_ADAPTER_LOG_RETENTION
///
/// # Errors
/// See [`configure_logging`].
pub fn configure_from_env() -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::env::var("NEXUS_ADAPTER_LOG_DIR").ok().map(PathBuf::from);
    let level = std::env::var("NEXUS_ADAPTER_LOG_LEVEL").ok();
    let retention =
        std::env::var("NEXUS_ADAPTER_LOG_RETENTION").ok().and_then(|s| s.parse::<usize>().ok());
    configure_logging(dir.as_deref(), level.as_deref(), retention)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(parse_level(Some("DEBUG")), LevelFilter::Debug);
        assert_eq!(parse_level(Some("off")), LevelFilter::Off);
        assert_eq!(parse_level(Some("loud")), LevelFilter::Info);
        assert_eq!(parse_level(None), LevelFilter::Info);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(init_path(Path::new("definitely/not/here/log4rs.yaml")).is_err());
    }
}
