use anyhow::Context;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;
use wheelctl_core::{LogLevel, LoggingConfig};

/// Install the global subscriber.
///
/// Logs go to the configured file unless console output is enabled or
/// `verbose` is set. `RUST_LOG` directives are honoured on top of the
/// configured level.
pub fn init(config: &LoggingConfig, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config
            .level
            .parse::<LogLevel>()
            .map(to_tracing)
            .unwrap_or(tracing::Level::INFO)
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    match (&config.file, config.enable_console || verbose) {
        (Some(path), false) => {
            rotate(path, config.max_size_mb, config.backup_count)
                .with_context(|| format!("failed to rotate {}", path.display()))?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn to_tracing(level: LogLevel) -> tracing::Level {
    match level {
        LogLevel::Trace => tracing::Level::TRACE,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Error => tracing::Level::ERROR,
    }
}

/// Shift `path` to `path.1`, `path.1` to `path.2` and so on when it has
/// grown past `max_size_mb`. The oldest backup beyond `backup_count` is lost.
pub fn rotate(path: &Path, max_size_mb: u64, backup_count: u32) -> std::io::Result<()> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if size <= max_size_mb.saturating_mul(1024 * 1024) {
        return Ok(());
    }

    if backup_count == 0 {
        return fs::remove_file(path);
    }
    for n in (1..backup_count).rev() {
        let from = backup(path, n);
        if from.exists() {
            fs::rename(&from, backup(path, n + 1))?;
        }
    }
    fs::rename(path, backup(path, 1))
}

fn backup(path: &Path, n: u32) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_mb(path: &Path, mb: usize) {
        fs::write(path, vec![b'x'; mb * 1024 * 1024 + 1]).unwrap();
    }

    #[test]
    fn small_file_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("wheelctl.log");
        fs::write(&log, "hello").unwrap();
        rotate(&log, 1, 3).unwrap();
        assert!(log.exists());
        assert!(!backup(&log, 1).exists());
    }

    #[test]
    fn oversized_file_shifts_backups() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("wheelctl.log");
        fs::write(backup(&log, 1), "older").unwrap();
        fs::write(backup(&log, 2), "oldest").unwrap();
        write_mb(&log, 1);

        rotate(&log, 1, 2).unwrap();
        assert!(!log.exists());
        assert!(fs::metadata(backup(&log, 1)).unwrap().len() > 1024 * 1024);
        assert_eq!(fs::read_to_string(backup(&log, 2)).unwrap(), "older");
        assert!(!backup(&log, 3).exists());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        rotate(&dir.path().join("absent.log"), 1, 3).unwrap();
    }
}
