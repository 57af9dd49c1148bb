//! Saved build-error logs
//!
//! Failed build output is kept under `<project>/.pageship/logs/` so `analyze`
//! and `ask` can look at it after the session ends.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const LOG_DIR: &str = ".pageship/logs";
const LATEST_LOG: &str = "latest.log";
const LOG_PREFIX: &str = "build-error-";
/// Timestamped logs kept after each save
pub const DEFAULT_RETENTION: usize = 20;

/// Receives raw error text from a failed build.
pub trait ErrorLogSink {
    fn persist(&mut self, text: &str) -> Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct ErrorLogStore {
    dir: PathBuf,
    retention: usize,
}

impl ErrorLogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(mut self, keep: usize) -> Self {
        self.retention = keep.max(1);
        self
    }

    pub fn for_project(root: &Path) -> Self {
        Self::new(root.join(LOG_DIR))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Most recently saved error text, if any.
    pub fn latest(&self) -> Result<Option<String>> {
        let path = self.dir.join(LATEST_LOG);
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .map(Some)
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    /// Timestamped logs, oldest first.
    fn saved_logs(&self) -> Result<Vec<(LogKey, PathBuf)>> {
        let mut logs: Vec<(LogKey, PathBuf)> = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter_map(|path| log_key(&path).map(|key| (key, path)))
            .collect();
        logs.sort();
        Ok(logs)
    }

    fn prune(&self) -> Result<()> {
        let logs = self.saved_logs()?;
        let excess = logs.len().saturating_sub(self.retention);
        for (_, path) in &logs[..excess] {
            if let Err(err) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %err, "could not remove old build log");
            }
        }
        Ok(())
    }
}

/// Timestamp and same-millisecond counter parsed from a log file name.
type LogKey = (String, u32);

fn log_key(path: &Path) -> Option<LogKey> {
    if path.extension()? != "log" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?.strip_prefix(LOG_PREFIX)?;
    match stem.split_once('-') {
        Some((stamp, n)) => Some((stamp.to_string(), n.parse().ok()?)),
        None => Some((stem.to_string(), 0)),
    }
}

impl ErrorLogSink for ErrorLogStore {
    fn persist(&mut self, text: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let next = self
            .saved_logs()?
            .into_iter()
            .filter(|((s, _), _)| *s == stamp)
            .map(|((_, n), _)| n + 1)
            .max()
            .unwrap_or(0);
        let name = if next == 0 {
            format!("{}{}.log", LOG_PREFIX, stamp)
        } else {
            format!("{}{}-{}.log", LOG_PREFIX, stamp, next)
        };
        let path = self.dir.join(name);
        fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
        fs::write(self.dir.join(LATEST_LOG), text)
            .with_context(|| format!("Failed to update {}", LATEST_LOG))?;
        self.prune()?;
        Ok(path)
    }
}
