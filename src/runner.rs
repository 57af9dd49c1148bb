//! Shell command execution
//!
//! Build and install commands are plain command strings (they come from
//! package.json, config, or a rewritten build invocation), so they run through
//! the platform shell.

use crate::autofix::applicator::{InstallDirective, PackageInstaller};
use crate::context::PackageManager;
use crate::util::{run_command_with_timeout, tail_chars};
use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default cap on captured output per stream (10 MB)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

const ERROR_TAIL_MAX_CHARS: usize = 4_000;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Runs command strings to completion.
pub trait CommandRunner {
    fn run(&mut self, command: &str, cwd: &Path, env: &[(String, String)]) -> Result<CommandOutput>;
}

/// Runs commands through `sh -c` (or `cmd /C` on Windows).
#[derive(Debug, Clone)]
pub struct ShellRunner {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1800),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl ShellRunner {
    pub fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            timeout,
            max_output_bytes,
        }
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

impl CommandRunner for ShellRunner {
    fn run(&mut self, command: &str, cwd: &Path, env: &[(String, String)]) -> Result<CommandOutput> {
        let mut cmd = shell_command(command);
        cmd.current_dir(cwd);
        for (key, value) in env {
            cmd.env(key, value);
        }

        debug!(command, cwd = %cwd.display(), "running command");
        let start = Instant::now();
        let result = run_command_with_timeout(&mut cmd, self.timeout, self.max_output_bytes)
            .map_err(anyhow::Error::msg)?;
        let duration_ms = start.elapsed().as_millis() as u64;

        if result.truncated {
            debug!(command, limit = self.max_output_bytes, "command output truncated");
        }

        let output = CommandOutput {
            exit_code: result.status.and_then(|s| s.code()),
            stdout: result.stdout,
            stderr: result.stderr,
            timed_out: result.timed_out,
            duration_ms,
        };
        info!(
            command,
            exit_code = ?output.exit_code,
            timed_out = output.timed_out,
            duration_ms,
            "command finished"
        );
        Ok(output)
    }
}

/// Installs packages by running the project's package manager.
pub struct PackageManagerInstaller<R> {
    runner: R,
    package_manager: PackageManager,
    cwd: PathBuf,
}

impl<R: CommandRunner> PackageManagerInstaller<R> {
    pub fn new(runner: R, package_manager: PackageManager, cwd: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            package_manager,
            cwd: cwd.into(),
        }
    }
}

impl<R: CommandRunner> PackageInstaller for PackageManagerInstaller<R> {
    fn install(&mut self, directive: &InstallDirective) -> Result<()> {
        let command = directive.command_line(self.package_manager);
        let output = self.runner.run(&command, &self.cwd, &[])?;
        if output.success() {
            return Ok(());
        }
        let detail = if output.stderr.trim().is_empty() {
            &output.stdout
        } else {
            &output.stderr
        };
        if output.timed_out {
            bail!("`{}` timed out", command);
        }
        bail!(
            "`{}` exited with {}: {}",
            command,
            output
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            tail_chars(detail.trim(), ERROR_TAIL_MAX_CHARS)
        )
    }
}
