use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::fs::OpenOptions;
use std::path::PathBuf;

fn level_from_env() -> LevelFilter {
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info)
}

/// Directory for service log files, `$PBENCH_LOG_DIR` or the temp dir.
pub fn log_dir() -> PathBuf {
    std::env::var("PBENCH_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
}

/// Install the process logger. Services also append to `<log_dir>/<app_name>.log`.
/// Calling this twice is harmless; the second call is ignored.
pub fn init_logging(app_name: &str, is_service: bool) {
    let level = level_from_env();
    let config = ConfigBuilder::new()
        .set_target_level(LevelFilter::Error)
        .set_thread_level(LevelFilter::Off)
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if is_service {
        let log_file = log_dir().join(format!("{}.log", app_name));
        match OpenOptions::new().create(true).append(true).open(&log_file) {
            Ok(file) => loggers.push(WriteLogger::new(level, config, file)),
            Err(e) => eprintln!("open log file {} failed: {}", log_file.display(), e),
        }
    }

    let _ = CombinedLogger::init(loggers);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_service_log_file() {
        let tmp_dir = TempDir::new().unwrap();
        std::env::set_var("PBENCH_LOG_DIR", tmp_dir.path());
        assert_eq!(log_dir(), tmp_dir.path());

        init_logging("dataset-lib-test", true);
        assert!(tmp_dir.path().join("dataset-lib-test.log").exists());
        // a second install is ignored
        init_logging("dataset-lib-test", false);
        std::env::remove_var("PBENCH_LOG_DIR");
    }
}
