//! Configuration management for pageship
//!
//! User settings live in ~/.config/pageship/config.json. A project can
//! override the build-related ones in `pageship.toml` at its root.

use crate::autofix::patterns::DEFAULT_MEMORY_LIMIT_MB;
use crate::runner::DEFAULT_MAX_OUTPUT_BYTES;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const PROJECT_CONFIG_FILE: &str = "pageship.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Offer automatic fixes when a build fails
    #[serde(default = "default_true")]
    pub auto_fix: bool,
    /// Apply fixes without asking
    #[serde(default)]
    pub assume_yes: bool,
    /// Kill a build that runs longer than this
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
    /// Per-stream cap on captured build output
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Heap size used when retrying an out-of-memory build
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u32,
    /// Force npm, yarn or pnpm instead of detecting from lockfiles
    #[serde(default)]
    pub package_manager: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_build_timeout_secs() -> u64 {
    1800
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

fn default_memory_limit_mb() -> u32 {
    DEFAULT_MEMORY_LIMIT_MB
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_fix: true,
            assume_yes: false,
            build_timeout_secs: default_build_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            memory_limit_mb: default_memory_limit_mb(),
            package_manager: None,
        }
    }
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("pageship"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if let Ok(content) = fs::read_to_string(path) {
            match serde_json::from_str(&content) {
                Ok(config) => return config,
                Err(err) => {
                    preserve_corrupt_config(path, &content);
                    warn!(
                        error = %err,
                        path = %path.display(),
                        "config file was corrupted; a backup was saved and defaults were loaded"
                    );
                }
            }
        }
        Self::default()
    }

    /// Save config to disk
    pub fn save(&self) -> Result<(), String> {
        let path = Self::config_path()
            .ok_or_else(|| "Could not determine config directory".to_string())?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        write_config_atomic(path, &content).map_err(|e| format!("Failed to write config: {}", e))
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/pageship/config.json".to_string())
    }
}

/// Build settings a project can pin in `pageship.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectOverrides {
    pub build_command: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub memory_limit_mb: Option<u32>,
    pub package_manager: Option<String>,
}

impl ProjectOverrides {
    /// Read `pageship.toml` from the project root; missing file means no overrides.
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        let path = root.join(PROJECT_CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid {}", path.display()))
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> Result<(), String> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path).map_err(|e| e.to_string())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            warn!(error = %e, "failed to set temp config file permissions");
        }
    }

    file.write_all(content.as_bytes())
        .map_err(|e| e.to_string())?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.to_string());
    }
    Ok(())
}
