//! Logging setup and log retention.
//!
//! Logs go to the console and to a daily rolling file under the platform data
//! directory. Only the newest [`MAX_LOG_FILES`] files are kept.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// File name prefix of the rolling appender.
pub const LOG_FILE_PREFIX: &str = "backoffice";

const DEFAULT_FILTER: &str = "info,the_small_backoffice=debug";

// ---------------------------------------------------------------------------
// Log directory
// ---------------------------------------------------------------------------

/// Platform data directory of the application.
pub fn get_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("com.thesmall.backoffice")
}

pub fn get_log_dir() -> PathBuf {
    get_data_dir().join("logs")
}

/// Delete all but the newest `MAX_LOG_FILES` log files in `log_dir`.
/// Returns how many were removed.
pub fn prune_old_logs(log_dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.file_name()?.to_str()?;
            if !path.is_file() || !name.starts_with(&format!("{LOG_FILE_PREFIX}.")) {
                return None;
            }
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            Some((path, modified))
        })
        .collect();

    // Newest first; ties broken by name so dated files order predictably.
    log_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    let mut removed = 0;
    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "failed to prune log file"),
        }
    }
    removed
}

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub dir: PathBuf,
    /// Write the file layer as JSON lines instead of plain text.
    pub json: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            dir: get_log_dir(),
            json: std::env::var("BACKOFFICE_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

/// Install the global subscriber: `RUST_LOG` filter (or the default), a
/// console layer, and a non-blocking daily file layer.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
pub fn init_logging(options: &LogOptions) -> Result<WorkerGuard, String> {
    fs::create_dir_all(&options.dir)
        .map_err(|e| format!("Failed to create log dir {}: {e}", options.dir.display()))?;
    prune_old_logs(&options.dir);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let file_appender = tracing_appender::rolling::daily(&options.dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let text_file_layer = (!options.json).then(|| {
        fmt::layer()
            .with_writer(non_blocking.clone())
            .with_ansi(false)
            .with_target(true)
    });
    let json_file_layer = options.json.then(|| {
        fmt::layer()
            .json()
            .with_writer(non_blocking.clone())
            .with_target(true)
    });
    let console_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(text_file_layer)
        .with(json_file_layer)
        .try_init()
        .map_err(|e| format!("Logging already initialised: {e}"))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn touch(dir: &Path, name: &str, age_secs: u64) {
        let path = dir.join(name);
        fs::write(&path, b"line\n").expect("write log");
        let file = fs::File::options().write(true).open(&path).expect("open");
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .expect("set mtime");
    }

    #[test]
    fn log_dir_is_stable() {
        let d1 = get_log_dir();
        assert_eq!(d1, get_log_dir());
        assert!(d1.to_string_lossy().contains("com.thesmall.backoffice"));
    }

    #[test]
    fn prune_keeps_newest_files_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        for day in 0..14u64 {
            touch(dir.path(), &format!("backoffice.2024-01-{:02}", day + 1), 86_400 * (14 - day));
        }
        touch(dir.path(), "unrelated.txt", 999_999);

        assert_eq!(prune_old_logs(dir.path()), 4);

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .expect("read dir")
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        left.sort();
        assert_eq!(left.len(), MAX_LOG_FILES + 1);
        assert!(left.contains(&"unrelated.txt".to_string()));
        assert!(left.contains(&"backoffice.2024-01-14".to_string()));
        assert!(!left.contains(&"backoffice.2024-01-01".to_string()));
    }

    #[test]
    fn prune_tolerates_missing_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(prune_old_logs(&dir.path().join("absent")), 0);
    }
}
