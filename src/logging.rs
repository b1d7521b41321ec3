/// Logging backend setup and per-component log contexts
use std::env;
use std::io::{self, Write};
use std::path::Path;

use log::LevelFilter;
use rolling_file::{BasicRollingFileAppender, RollingConditionBasic};

use crate::error::AppError;

pub const RX_TARGET: &str = "rtl::rx";
pub const RRD_TARGET: &str = "rtl::rrd";
pub const CONFIG_TARGET: &str = "rtl::config";

/// Rotated log files kept beside the active one
pub const LOG_BACKUPS: usize = 14;

/// Logging handle given to each component at construction
///
/// Components log through their own target so that `RUST_LOG=rtl::rx=debug`
/// style filters can single out one stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogContext {
    target: &'static str,
}

impl LogContext {
    pub const fn new(target: &'static str) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &'static str {
        self.target
    }
}

/// Map the `-v` count to a level: errors only by default, then warnings,
/// informational messages and finally debug output.
pub fn level_from_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

/// Open a log file that rolls over at midnight, keeping `LOG_BACKUPS`
/// old files as `<path>.1` (newest) to `<path>.14`
pub fn rotating_file(path: &Path) -> io::Result<BasicRollingFileAppender> {
    BasicRollingFileAppender::new(path, RollingConditionBasic::new().daily(), LOG_BACKUPS)
}

/// Install the global env_logger backend
///
/// # Arguments
/// * `verbosity` - number of `-v` flags
/// * `debug` - use the detailed `time level target message` format
/// * `logfile` - append to this daily rotated file instead of stderr
///
/// # Returns
/// The effective base level
pub fn init(verbosity: u8, debug: bool, logfile: Option<&Path>) -> Result<LevelFilter, AppError> {
    let level = level_from_verbosity(verbosity);

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);

    // RUST_LOG refines the base level per target
    if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    if debug {
        builder.format(|buf, record| {
            writeln!(
                buf,
                "{} {:<8} {:<20} {}",
                buf.timestamp_millis(),
                record.level(),
                record.target(),
                record.args()
            )
        });
    } else {
        builder.format(|buf, record| writeln!(buf, "{}", record.args()));
    }

    if let Some(path) = logfile {
        let file = rotating_file(path)
            .map_err(|e| AppError::Logging(format!("{}: {}", path.display(), e)))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))?;

    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_from_verbosity(0), LevelFilter::Error);
        assert_eq!(level_from_verbosity(1), LevelFilter::Warn);
        assert_eq!(level_from_verbosity(2), LevelFilter::Info);
        assert_eq!(level_from_verbosity(3), LevelFilter::Debug);
        assert_eq!(level_from_verbosity(9), LevelFilter::Debug);
    }

    #[test]
    fn test_context_target() {
        assert_eq!(LogContext::new(RX_TARGET).target(), "rtl::rx");
    }

    #[test]
    fn test_log_file_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtl433-rrd.log");

        let mut file = rotating_file(&path).unwrap();
        writeln!(file, "monday").unwrap();
        file.rollover().unwrap();
        writeln!(file, "tuesday").unwrap();
        file.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "tuesday\n");
        let backup = dir.path().join("rtl433-rrd.log.1");
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "monday\n");
    }

    #[test]
    fn test_backups_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtl433-rrd.log");

        let mut file = rotating_file(&path).unwrap();
        for day in 0..20 {
            writeln!(file, "day {}", day).unwrap();
            file.rollover().unwrap();
        }
        writeln!(file, "today").unwrap();
        file.flush().unwrap();

        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, LOG_BACKUPS + 1);
    }
}
