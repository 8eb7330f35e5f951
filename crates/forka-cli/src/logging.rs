//! Daily log files with retention cleanup
//!
//! One file per day under `<data_dir>/logs`, files older than the retention
//! window are removed when logging starts.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_RETENTION_DAYS: u64 = 7;
const LOG_PREFIX: &str = "forka";

pub struct LogManager {
    log_dir: PathBuf,
}

impl LogManager {
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    pub fn current_log_path(&self) -> PathBuf {
        let today = chrono::Local::now().format("%Y-%m-%d");
        self.log_dir.join(format!("{}.{}.log", LOG_PREFIX, today))
    }

    fn is_log_file(path: &Path) -> bool {
        path.is_file()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(LOG_PREFIX) && n.ends_with(".log"))
    }

    /// Deletes log files last modified more than `days` ago. Returns how many
    /// were removed.
    pub fn cleanup_older_than(&self, days: u64) -> Result<usize> {
        let cutoff = SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60);
        let mut deleted = 0;
        for path in self.log_files()? {
            let modified = fs::metadata(&path)?.modified()?;
            if modified >= cutoff {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => eprintln!("Failed to delete old log {}: {}", path.display(), e),
            }
        }
        if deleted > 0 {
            tracing::info!("Cleaned up {} old log file(s)", deleted);
        }
        Ok(deleted)
    }

    /// Log files, newest first.
    pub fn log_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        if !self.log_dir.exists() {
            return Ok(files);
        }
        for entry in fs::read_dir(&self.log_dir)? {
            let path = entry?.path();
            if Self::is_log_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        files.reverse();
        Ok(files)
    }

    pub fn total_size(&self) -> Result<u64> {
        Ok(self
            .log_files()?
            .iter()
            .filter_map(|file| fs::metadata(file).ok())
            .map(|metadata| metadata.len())
            .sum())
    }

    pub fn format_size(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}

pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn level_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Installs the global subscriber: a daily file plus stderr. Keep the guard
/// alive for the lifetime of the process so buffered lines get flushed.
pub fn init_logging(log_dir: &Path, log_level: &str) -> Result<LoggingGuard> {
    fs::create_dir_all(log_dir)?;
    let manager = LogManager::new(log_dir.to_path_buf());
    manager.cleanup_older_than(LOG_RETENTION_DAYS)?;

    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(manager.current_log_path())?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .with_filter(level_filter(log_level));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_filter(level_filter(log_level));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    Ok(LoggingGuard { _guard: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("forka-logs-{}-{}", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn lists_only_forka_logs_newest_first() {
        let dir = temp_log_dir("list");
        fs::create_dir_all(&dir).expect("create dir");
        fs::write(dir.join("forka.2026-01-01.log"), "a").expect("write");
        fs::write(dir.join("forka.2026-01-02.log"), "bb").expect("write");
        fs::write(dir.join("other.log"), "c").expect("write");
        fs::write(dir.join("forka.db"), "d").expect("write");

        let manager = LogManager::new(dir.clone());
        let files = manager.log_files().expect("files");
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("forka.2026-01-02.log"));
        assert_eq!(manager.total_size().expect("size"), 3);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn cleanup_keeps_recent_files() {
        let dir = temp_log_dir("cleanup");
        fs::create_dir_all(&dir).expect("create dir");
        fs::write(dir.join("forka.today.log"), "fresh").expect("write");

        let manager = LogManager::new(dir.clone());
        assert_eq!(manager.cleanup_older_than(LOG_RETENTION_DAYS).expect("cleanup"), 0);
        assert_eq!(manager.log_files().expect("files").len(), 1);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_directory_has_no_logs() {
        let manager = LogManager::new(temp_log_dir("missing"));
        assert!(manager.log_files().expect("files").is_empty());
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(LogManager::format_size(512), "512 B");
        assert_eq!(LogManager::format_size(2048), "2.00 KB");
        assert_eq!(LogManager::format_size(3 * 1024 * 1024), "3.00 MB");
    }
}
